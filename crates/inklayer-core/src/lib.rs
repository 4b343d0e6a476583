//! InkLayer Core Library
//!
//! Layered raster drawing with per-author isolation and full-snapshot
//! synchronization between peers sharing a room.

pub mod canvas;
pub mod collaboration;
pub mod compositor;
pub mod config;
pub mod history;
pub mod identity;
pub mod layer;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod stroke;
pub mod style;
pub mod surface;
pub mod sync;

pub use canvas::Canvas;
pub use collaboration::{CollaborationManager, SessionEvent};
pub use compositor::Compositor;
pub use config::{ConfigError, SessionConfig};
pub use history::HistoryManager;
pub use identity::Identity;
pub use layer::{AuthorId, Layer, LayerStore, SurfaceGeometry};
pub use metrics::{ConflictMetrics, MetricsSampler};
pub use presence::{Participant, RemoteCursors, Roster};
pub use protocol::{Envelope, ProtocolError, StrokePhase, WireEvent, WirePoint};
pub use session::DrawingSession;
pub use snapshot::{Snapshot, SnapshotError};
pub use stroke::{StrokeRenderer, StrokeStyle};
pub use style::{StrokeColor, StrokeMode};
pub use surface::SurfaceLifecycle;
pub use sync::{ClientEvent, ConnectionState, NativeWebSocket, ReconnectPolicy};
