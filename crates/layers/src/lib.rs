pub mod atlas;
pub mod handoff;
pub mod live;
pub mod packer;
pub mod store;

pub use atlas::{Atlas, AtlasEntry, AtlasError, AtlasRect, SharedAtlas};
pub use handoff::{BufferSink, DiscardPacks, PackedBufferHandoff, SinkClosed};
pub use hit_test::{Hit, MapQuery, ScreenProjector, ScreenQuery, hit_test_map, hit_test_screen};
pub use live::{LayerConfig, LayerError, LiveLayer, LiveLayerHandle};
pub use packer::{FourthByte, MarkerVertex, PackOptions, PackedBuffer, ViewState, pack};
pub use store::{CommitSummary, FeatureStore, StoreConfig};
