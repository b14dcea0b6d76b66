pub mod callback;
pub mod client;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;
pub mod view;

pub use callback::{ProducerCallbacks, TracingCallbacks};
pub use client::{Client, ClientConfig};
pub use error::{Error, Result};
pub use model::{ContentStorePressurePolicy, ContentViewOverflowPolicy, FrameOrderMode, StreamInfo, StreamState, StreamingType};
pub use store::ContentStore;
pub use stream::{Ack, AckKind, PutFrameOutcome, Stream};
pub use view::{ContentViewConsumer, ContentViewProducer, Entry, EntryFlags};
