//! Touch-driven GLB/glTF model viewer.
//!
//! [`viewer::ModelViewer`] is the component a host mounts on a graphics
//! surface: it fetches and decodes a model in the background, shows a
//! placeholder cube until the model is ready, turns touch gestures into
//! rotation, zoom and taps, and highlights the unit under a tap.

pub mod assets;
pub mod config;
pub mod gesture;
pub mod render;
pub mod scene;
pub mod viewer;
