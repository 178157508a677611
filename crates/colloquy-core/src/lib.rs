// Library root for the debate timeline core: the canonical event model,
// payload normalization, the timeline store, derived aggregates, and the
// configuration shared by the streaming layer.

pub mod aggregate;
pub mod config;
pub mod event;
pub mod normalize;
pub mod protocol;
pub mod timeline;
