//! demix - Audio source-separation inference engine
//!
//! Given a mixed waveform and a trained separation model (or a weighted
//! ensemble of models), produce isolated stems with bounded memory use
//! regardless of input length and with results independent of how the input
//! is chunked internally.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - `types`: waveform and stem value types
//! - `config`: runtime settings for one separation request
//! - `model`: the opaque model contract and the ensemble bag
//! - `separation`: segment planning, shift augmentation, batched inference,
//!   overlap stitching, and ensemble aggregation
//! - `cancel`: cooperative cancellation
//! - `progress`: phase-boundary observation hooks
//!
//! Audio codec I/O, model loading, and CLI surfaces are deliberately outside
//! this crate; the engine consumes an in-memory waveform and borrowed model
//! descriptors.
//!
//! # Example
//!
//! ```no_run
//! use demix::{CancellationToken, ModelBag, SeparationConfig, SeparationEngine, Waveform};
//!
//! # fn load_model() -> Box<dyn demix::SeparationModel> { unimplemented!() }
//! # fn load_audio() -> Waveform { unimplemented!() }
//! let model = load_model();
//! let mix: Waveform = load_audio();
//!
//! let engine = SeparationEngine::new(SeparationConfig::default()).expect("valid config");
//! let bag = ModelBag::single(model.as_ref()).expect("valid bag");
//! let stems = engine
//!     .separate(&mix, &bag, &CancellationToken::new())
//!     .expect("separation failed");
//! for (name, stem) in stems.iter() {
//!     println!("{}: {:.2}s", name, stem.duration());
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod separation;
pub mod types;

// Re-export key types at crate root
pub use cancel::CancellationToken;
pub use config::{ComputeDevice, SeparationConfig, TaperShape};
pub use error::{DemixError, Result};
pub use model::{BagEntry, ModelBag, SeparationModel};
pub use progress::{NoOpObserver, SeparationEvent, SeparationObserver};
pub use separation::SeparationEngine;
pub use types::{Stems, Waveform};
