pub mod codec;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use codec::{codec_for, Codec, JsonCodec};
pub use config::AppConfig;
pub use errors::*;
pub use models::*;
pub use traits::*;
