pub mod accumulator;
pub mod frame;
pub mod scene_buffers;

pub use accumulator::ConvergenceAccumulator;
pub use frame::FrameOrchestrator;
pub use scene_buffers::SceneBufferBuilder;
