//! Capability providers backed by external processes.

mod command;
mod wav;

pub use command::{
    BackendConfigError, CommandBackend, CommandBackendFactory, CommandSpec, ENV_DEVICE, ENV_MODE,
    ENV_MODEL_INDEX, ENV_MODEL_WEIGHTS, ENV_PARAMS,
};
pub use wav::{encode_pcm16, wav_duration};
