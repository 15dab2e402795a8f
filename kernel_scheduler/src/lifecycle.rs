use fxhash::{FxHashMap, FxHashSet};
use kernel_core::entity::{Entity, LifecycleState};
use kernel_core::error::CoreResult;
use kernel_core::repository::Repository;
use kernel_core::schema::Schema;
use tracing::{debug, warn};

/// Identifies a lifecycle participant (a `Module`, keyed by an id the
/// caller assigns — the coordinator itself is agnostic to how that id
/// maps back to a registered module).
pub type ParticipantId = u32;

/// Published once per `begin_construction`, naming the entity and an
/// opaque type tag participants use to decide what to initialize.
#[derive(Copy, Clone, Debug)]
pub struct ConstructionOrder {
    pub entity: Entity,
    pub type_id: u32,
}

/// Published by a participant once it has finished its share of a
/// construction. `success = false` aborts the whole quorum.
#[derive(Copy, Clone, Debug)]
pub struct ConstructionAck {
    pub entity: Entity,
    pub participant: ParticipantId,
    pub success: bool,
}

/// Published once per `begin_destruction`.
#[derive(Copy, Clone, Debug)]
pub struct DestructionOrder {
    pub entity: Entity,
}

/// Published by a participant once it has finished its share of a
/// destruction.
#[derive(Copy, Clone, Debug)]
pub struct DestructionAck {
    pub entity: Entity,
    pub participant: ParticipantId,
    pub success: bool,
}

/// Registers the four lifecycle event types on `schema`. Must run once,
/// before any repository using the lifecycle coordinator is created
/// from it, alongside the application's own component/event
/// registration.
pub fn register_events(schema: &mut Schema) -> CoreResult<()> {
    schema.register_event::<ConstructionOrder>()?;
    schema.register_event::<ConstructionAck>()?;
    schema.register_event::<DestructionOrder>()?;
    schema.register_event::<DestructionAck>()?;
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Kind {
    Construction,
    Destruction,
}

struct Pending {
    kind: Kind,
    remaining: FxHashSet<ParticipantId>,
    start_tick: u64,
    aborted: bool,
}

/// Distributed two-phase construction/destruction coordinator (§4.12).
///
/// `begin_construction`/`begin_destruction` publish an Order event and
/// record the set of participants that must ACK. `process` — called
/// once per tick after the event-buffer swap, on the repository's
/// owning thread — drains this tick's Ack events, resolves any pending
/// record whose `remaining` set has emptied, and force-destroys any
/// pending record older than `timeout_frames`, incrementing
/// `timeout_count`.
///
/// A single coordinator is scoped to one repository; the open question
/// of whether breaker/coordinator state should be shared across
/// multiple co-existing kernels is left to the caller (see
/// `DESIGN.md`).
pub struct LifecycleCoordinator {
    pending: FxHashMap<Entity, Pending>,
    timeout_frames: u64,
    timeout_count: u64,
}

impl LifecycleCoordinator {
    pub fn new(timeout_frames: u64) -> Self {
        LifecycleCoordinator {
            pending: FxHashMap::default(),
            timeout_frames,
            timeout_count: 0,
        }
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeout_count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, entity: Entity) -> bool {
        self.pending.contains_key(&entity)
    }

    /// Moves `entity` to `Constructing`, publishes `ConstructionOrder`,
    /// and records `participants` as the ACK quorum. An empty
    /// participant set transitions straight to `Active` — there is
    /// nobody to wait on.
    pub fn begin_construction(
        &mut self,
        repo: &mut Repository,
        entity: Entity,
        type_id: u32,
        participants: impl IntoIterator<Item = ParticipantId>,
        tick: u64,
    ) {
        repo.set_lifecycle_state(entity, LifecycleState::Constructing);
        let remaining: FxHashSet<ParticipantId> = participants.into_iter().collect();
        let _ = repo.publish_event(ConstructionOrder { entity, type_id });
        if remaining.is_empty() {
            repo.set_lifecycle_state(entity, LifecycleState::Active);
            return;
        }
        self.pending.insert(
            entity,
            Pending {
                kind: Kind::Construction,
                remaining,
                start_tick: tick,
                aborted: false,
            },
        );
    }

    /// Moves `entity` to `Destroying`, publishes `DestructionOrder`, and
    /// records `participants` as the ACK quorum. An empty participant
    /// set destroys the entity immediately.
    pub fn begin_destruction(
        &mut self,
        repo: &mut Repository,
        entity: Entity,
        participants: impl IntoIterator<Item = ParticipantId>,
        tick: u64,
    ) {
        repo.set_lifecycle_state(entity, LifecycleState::Destroying);
        let remaining: FxHashSet<ParticipantId> = participants.into_iter().collect();
        let _ = repo.publish_event(DestructionOrder { entity });
        if remaining.is_empty() {
            repo.destroy_entity(entity);
            return;
        }
        self.pending.insert(
            entity,
            Pending {
                kind: Kind::Destruction,
                remaining,
                start_tick: tick,
                aborted: false,
            },
        );
    }

    /// Drains this tick's `ConstructionAck`/`DestructionAck` events,
    /// resolves quorums that have emptied (or aborted), and
    /// force-destroys anything that has outlived `timeout_frames`.
    /// Must run after the event-buffer swap that made those acks
    /// visible, and before the next barrier's dispatch begins.
    pub fn process(&mut self, repo: &mut Repository, tick: u64) {
        let construction_acks: Vec<ConstructionAck> = repo
            .consume_events::<ConstructionAck>()
            .map(|acks| acks.to_vec())
            .unwrap_or_default();
        let destruction_acks: Vec<DestructionAck> = repo
            .consume_events::<DestructionAck>()
            .map(|acks| acks.to_vec())
            .unwrap_or_default();

        for ack in construction_acks {
            self.apply_ack(ack.entity, ack.participant, ack.success);
        }
        for ack in destruction_acks {
            self.apply_ack(ack.entity, ack.participant, ack.success);
        }

        let mut settled = Vec::new();
        for (&entity, pending) in self.pending.iter() {
            let timed_out = tick.saturating_sub(pending.start_tick) >= self.timeout_frames;
            if pending.aborted || pending.remaining.is_empty() || timed_out {
                settled.push((entity, timed_out));
            }
        }

        for (entity, timed_out) in settled {
            let pending = self.pending.remove(&entity).expect("observed during this pass");
            if timed_out && !pending.remaining.is_empty() {
                self.timeout_count += 1;
                warn!(%entity, tick, "lifecycle quorum timed out, forcing destruction");
                repo.destroy_entity(entity);
                continue;
            }
            match (pending.kind, pending.aborted) {
                (Kind::Construction, true) => {
                    debug!(%entity, "construction aborted by a failed ack, destroying");
                    repo.destroy_entity(entity);
                }
                (Kind::Construction, false) => {
                    debug!(%entity, "construction quorum satisfied");
                    repo.set_lifecycle_state(entity, LifecycleState::Active);
                }
                (Kind::Destruction, _) => {
                    debug!(%entity, "destruction quorum satisfied");
                    repo.destroy_entity(entity);
                }
            }
        }
    }

    fn apply_ack(&mut self, entity: Entity, participant: ParticipantId, success: bool) {
        if let Some(pending) = self.pending.get_mut(&entity) {
            pending.remaining.remove(&participant);
            if !success {
                pending.aborted = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::schema::Schema;

    fn repo_with_lifecycle_events() -> Repository {
        let mut schema = Schema::new();
        register_events(&mut schema).unwrap();
        Repository::new(schema, 16)
    }

    /// Scenario F: participants {1,2,3}, timeout_frames=300.
    /// `begin_construction(e, t)` at tick 10; acks arrive at ticks
    /// 11, 12, 14 from participants 1, 2, 3. At tick 14 the entity
    /// transitions to `Active`.
    #[test]
    fn construction_quorum_transitions_to_active() {
        let mut repo = repo_with_lifecycle_events();
        let e = repo.create_entity();
        let mut coordinator = LifecycleCoordinator::new(300);

        coordinator.begin_construction(&mut repo, e, 7, [1, 2, 3], 10);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Constructing));

        // tick 11: participant 1 acks
        repo.get_command_buffer().publish(ConstructionAck { entity: e, participant: 1, success: true });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 11);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Constructing));
        assert_eq!(coordinator.pending_count(), 1);

        // tick 12: participant 2 acks
        repo.get_command_buffer().publish(ConstructionAck { entity: e, participant: 2, success: true });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 12);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Constructing));

        // tick 14: participant 3 acks, quorum completes
        repo.get_command_buffer().publish(ConstructionAck { entity: e, participant: 3, success: true });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 14);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Active));
        assert_eq!(coordinator.pending_count(), 0);
        assert!(repo.is_alive(e));
    }

    #[test]
    fn construction_timeout_destroys_entity_and_counts() {
        let mut repo = repo_with_lifecycle_events();
        let e = repo.create_entity();
        let mut coordinator = LifecycleCoordinator::new(300);

        coordinator.begin_construction(&mut repo, e, 1, [1, 2, 3], 10);
        repo.get_command_buffer().publish(ConstructionAck { entity: e, participant: 1, success: true });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 11);

        // participant 3 never acks; tick 310 is 300 ticks past start_tick 10
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 310);

        assert!(!repo.is_alive(e));
        assert_eq!(coordinator.timeout_count(), 1);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn failed_ack_aborts_construction_and_destroys() {
        let mut repo = repo_with_lifecycle_events();
        let e = repo.create_entity();
        let mut coordinator = LifecycleCoordinator::new(300);

        coordinator.begin_construction(&mut repo, e, 1, [1, 2], 0);
        repo.get_command_buffer().publish(ConstructionAck { entity: e, participant: 1, success: false });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 1);

        assert!(!repo.is_alive(e));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn empty_participant_set_is_immediately_active() {
        let mut repo = repo_with_lifecycle_events();
        let e = repo.create_entity();
        let mut coordinator = LifecycleCoordinator::new(300);

        coordinator.begin_construction(&mut repo, e, 1, [], 0);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Active));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn destruction_quorum_destroys_entity() {
        let mut repo = repo_with_lifecycle_events();
        let e = repo.create_entity();
        let mut coordinator = LifecycleCoordinator::new(300);

        coordinator.begin_destruction(&mut repo, e, [1], 0);
        assert_eq!(repo.lifecycle_state(e), Some(LifecycleState::Destroying));
        assert!(repo.is_alive(e));

        repo.get_command_buffer().publish(DestructionAck { entity: e, participant: 1, success: true });
        repo.playback_own_commands().unwrap();
        repo.swap_event_buffers();
        coordinator.process(&mut repo, 1);

        assert!(!repo.is_alive(e));
    }
}
