use crate::entity::Entity;
use thiserror::Error;

/// Errors raised by the storage, schema, and snapshot layers.
///
/// `UnknownComponent`/`UnknownEvent`/`DuplicateRegistration` indicate a
/// schema mismatch or setup bug and are meant to be fatal to whoever
/// hits them directly. `DeadEntity` is only fatal on direct API calls;
/// command-buffer playback treats it as a silent skip (see
/// `crate::command`).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("component `{0}` was never registered on this repository's schema")]
    UnknownComponent(&'static str),

    #[error("event `{0}` was never registered on this repository's schema")]
    UnknownEvent(&'static str),

    #[error("entity {0} is dead")]
    DeadEntity(Entity),

    #[error("`{0}` was already registered on this schema")]
    DuplicateRegistration(&'static str),

    #[error("on-demand snapshot pool exhausted after the acquire deadline")]
    PoolExhausted,

    #[error("missing singleton of type `{0}`")]
    MissingSingleton(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;
