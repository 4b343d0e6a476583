//! Resolution changes without losing raster content.
//!
//! A resize runs in two phases. [`SurfaceLifecycle::begin_resize`] snapshots
//! every layer and marks the surface as restoring; [`SurfaceLifecycle::finish_resize`]
//! resizes the buffers and restores each snapshot at the new size. Callers must
//! hold back stroke events between the two phases.

use crate::compositor::Compositor;
use crate::layer::{AuthorId, LayerStore, SurfaceGeometry};
use crate::snapshot::{Snapshot, SnapshotResult};

#[derive(Debug, Clone)]
struct PendingRestore {
    geometry: SurfaceGeometry,
    snapshots: Vec<(AuthorId, Snapshot)>,
}

/// Coordinates snapshot, resize and restore of every layer.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLifecycle {
    pending: Option<PendingRestore>,
}

impl SurfaceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True between `begin_resize` and `finish_resize`.
    pub fn is_restoring(&self) -> bool {
        self.pending.is_some()
    }

    /// Snapshot every layer ahead of a geometry change.
    ///
    /// Returns `Ok(false)` if the geometry is unchanged and nothing needs to
    /// happen. A second call before `finish_resize` retargets the pending
    /// resize and keeps the snapshots already taken.
    pub fn begin_resize(
        &mut self,
        layers: &LayerStore,
        geometry: SurfaceGeometry,
    ) -> SnapshotResult<bool> {
        if let Some(pending) = &mut self.pending {
            pending.geometry = geometry;
            return Ok(true);
        }
        if layers.geometry() == geometry {
            return Ok(false);
        }

        let mut snapshots = Vec::with_capacity(layers.len());
        for author in layers.authors() {
            snapshots.push((author.clone(), layers.snapshot(&author)?));
        }
        log::debug!(
            "Resizing {} layers to {}x{} @{}",
            snapshots.len(),
            geometry.logical_size.width,
            geometry.logical_size.height,
            geometry.scale_factor
        );
        self.pending = Some(PendingRestore {
            geometry,
            snapshots,
        });
        Ok(true)
    }

    /// Resize every buffer, restore the snapshots scaled to the new size and
    /// recompose. Returns the number of layers restored.
    ///
    /// A snapshot that fails to restore leaves its layer with the stretched
    /// pre-resize content.
    pub fn finish_resize(&mut self, layers: &mut LayerStore, compositor: &mut Compositor) -> usize {
        let Some(pending) = self.pending.take() else {
            return 0;
        };

        layers.resize_all(pending.geometry);
        let mut restored = 0;
        for (author, snapshot) in &pending.snapshots {
            // Authors removed mid-resize stay removed.
            if !layers.contains(author) {
                continue;
            }
            match layers.restore(author, snapshot) {
                Ok(()) => restored += 1,
                Err(e) => log::warn!("Failed to restore layer {} after resize: {}", author, e),
            }
        }
        compositor.recompose(layers);
        restored
    }

    /// Resize in one step.
    pub fn on_resize(
        &mut self,
        layers: &mut LayerStore,
        compositor: &mut Compositor,
        geometry: SurfaceGeometry,
    ) -> SnapshotResult<usize> {
        if !self.begin_resize(layers, geometry)? {
            return Ok(0);
        }
        Ok(self.finish_resize(layers, compositor))
    }
}
