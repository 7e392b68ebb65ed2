//! The contract between the effects and the host application.
//!
//! Registration, parameter widgets and clip negotiation belong to the host and
//! are not modelled; only what a render call touches is described here.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ViewFxResult;
use crate::geometry::{PointD, RectD, RectI, RenderScale};
use crate::image::{BitDepth, Components, Field, ImageBuffer, ImageMut, ImageRef};

/// Cooperative cancellation flag shared between the host and render workers.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running workers to stop at their next row.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Arguments of one render call.
#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub time: f64,
    /// Pixels to produce, always inside the destination image bounds.
    pub render_window: RectI,
    pub render_scale: RenderScale,
    pub field: Field,
    /// The host has a GPU context ready for this call.
    pub gpu_enabled: bool,
    pub abort: AbortFlag,
}

impl RenderArgs {
    pub fn new(time: f64, render_window: RectI) -> Self {
        Self {
            time,
            render_window,
            render_scale: RenderScale::FULL,
            field: Field::None,
            gpu_enabled: false,
            abort: AbortFlag::new(),
        }
    }

    pub fn with_render_scale(mut self, scale: RenderScale) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_gpu(mut self, enabled: bool) -> Self {
        self.gpu_enabled = enabled;
        self
    }
}

/// What the host told us about itself at load time.
#[derive(Debug, Clone)]
pub struct HostDescription {
    pub name: String,
    pub api_version: (u32, u32),
    pub supports_gpu_render: bool,
    /// Point parameters may declare their defaults in normalised coordinates.
    pub supports_normalised_defaults: bool,
    /// Images can be fetched per view (stereoscopic clips).
    pub supports_multiview: bool,
}

impl Default for HostDescription {
    fn default() -> Self {
        Self {
            name: "viewfx.local".to_string(),
            api_version: (1, 4),
            supports_gpu_render: true,
            supports_normalised_defaults: true,
            supports_multiview: true,
        }
    }
}

/// Project geometry in canonical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectInfo {
    pub size: PointD,
    pub offset: PointD,
    pub extent: PointD,
    pub pixel_aspect: f64,
}

impl ProjectInfo {
    /// A project whose extent equals its size, at the origin.
    pub fn from_size(width: f64, height: f64) -> Self {
        Self {
            size: PointD::new(width, height),
            offset: PointD::default(),
            extent: PointD::new(width, height),
            pixel_aspect: 1.0,
        }
    }

    /// The project rectangle, `offset .. offset + size`.
    pub fn rect(&self) -> RectD {
        RectD::new(
            self.offset.x,
            self.offset.y,
            self.offset.x + self.size.x,
            self.offset.y + self.size.y,
        )
    }

    /// Convert a point given in `[0, 1]` project-relative coordinates.
    pub fn denormalise(&self, p: PointD) -> PointD {
        PointD::new(
            p.x * self.extent.x + self.offset.x,
            p.y * self.extent.y + self.offset.y,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Message,
    Warning,
    Error,
}

/// Clips an effect reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipName {
    Source,
    Output,
}

impl fmt::Display for ClipName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipName::Source => write!(f, "Source"),
            ClipName::Output => write!(f, "Output"),
        }
    }
}

/// Host services available to an effect instance.
pub trait Host: Send + Sync {
    fn description(&self) -> &HostDescription;

    fn project(&self) -> ProjectInfo;

    /// One-shot message shown to the user.
    fn send_message(&self, kind: MessageKind, text: &str);

    /// Message attached to the instance until cleared.
    fn set_persistent_message(&self, kind: MessageKind, text: &str);

    fn clear_persistent_message(&self);
}

/// Input images, owned by the host.
pub trait ImageSource: Sync {
    /// Fetch the image of `clip` at `time`; `view` selects a stereoscopic view.
    fn fetch(&self, clip: ClipName, time: f64, view: Option<usize>) -> Option<ImageRef<'_>>;

    fn region_of_definition(&self, clip: ClipName, time: f64) -> Option<RectD>;
}

/// Regions of interest declared by an effect for one request.
#[derive(Debug, Default)]
pub struct RoiSetter {
    regions: Vec<(ClipName, RectD)>,
}

impl RoiSetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, clip: ClipName, rect: RectD) {
        self.regions.retain(|(c, _)| *c != clip);
        self.regions.push((clip, rect));
    }

    pub fn get(&self, clip: ClipName) -> Option<RectD> {
        self.regions.iter().find(|(c, _)| *c == clip).map(|(_, r)| *r)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Static facts about an effect, as handed to the host at describe time.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub identifier: &'static str,
    pub label: &'static str,
    pub grouping: &'static str,
    pub description: &'static str,
    pub version: (u32, u32),
    pub bit_depths: Vec<BitDepth>,
    pub components: Vec<Components>,
    pub supports_tiles: bool,
    pub supports_multi_resolution: bool,
    pub supports_gpu_render: bool,
}

/// An effect instance as seen by the host.
pub trait ImageEffect: Send + Sync {
    fn descriptor(&self) -> PluginDescriptor;

    /// Produce `args.render_window` into `dst`.
    fn render(
        &self,
        args: &RenderArgs,
        sources: &dyn ImageSource,
        dst: Option<ImageMut<'_>>,
    ) -> ViewFxResult<()>;

    /// Declare the source regions needed to render `window`.
    fn regions_of_interest(
        &self,
        time: f64,
        scale: RenderScale,
        window: RectD,
        sources: &dyn ImageSource,
        rois: &mut RoiSetter,
    );

    /// Output region; `None` keeps the host default.
    fn region_of_definition(
        &self,
        time: f64,
        scale: RenderScale,
        sources: &dyn ImageSource,
    ) -> ViewFxResult<Option<RectD>>;

    /// A parameter was edited by the user or the host.
    fn changed_param(&self, name: &str, time: f64) -> ViewFxResult<()> {
        let _ = (name, time);
        Ok(())
    }
}

/// In-process host: records messages, serves a fixed project.
#[derive(Debug)]
pub struct LocalHost {
    description: HostDescription,
    project: ProjectInfo,
    messages: Mutex<Vec<(MessageKind, String)>>,
    persistent: Mutex<Option<(MessageKind, String)>>,
}

impl LocalHost {
    pub fn new(description: HostDescription, project: ProjectInfo) -> Self {
        Self {
            description,
            project,
            messages: Mutex::new(Vec::new()),
            persistent: Mutex::new(None),
        }
    }

    /// Messages sent so far, oldest first.
    pub fn messages(&self) -> Vec<(MessageKind, String)> {
        self.messages.lock().clone()
    }

    pub fn persistent_message(&self) -> Option<(MessageKind, String)> {
        self.persistent.lock().clone()
    }
}

impl Host for LocalHost {
    fn description(&self) -> &HostDescription {
        &self.description
    }

    fn project(&self) -> ProjectInfo {
        self.project
    }

    fn send_message(&self, kind: MessageKind, text: &str) {
        tracing::info!(?kind, "{}", text);
        self.messages.lock().push((kind, text.to_string()));
    }

    fn set_persistent_message(&self, kind: MessageKind, text: &str) {
        *self.persistent.lock() = Some((kind, text.to_string()));
    }

    fn clear_persistent_message(&self) {
        *self.persistent.lock() = None;
    }
}

/// Source clip images held in memory, keyed by clip and view.
#[derive(Debug, Default)]
pub struct MemorySource {
    images: HashMap<(ClipName, usize), ImageBuffer>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the image for `clip`, view `view`.
    pub fn insert(&mut self, clip: ClipName, view: usize, image: ImageBuffer) {
        self.images.insert((clip, view), image);
    }

    pub fn with(mut self, clip: ClipName, view: usize, image: ImageBuffer) -> Self {
        self.insert(clip, view, image);
        self
    }
}

impl ImageSource for MemorySource {
    fn fetch(&self, clip: ClipName, _time: f64, view: Option<usize>) -> Option<ImageRef<'_>> {
        self.images
            .get(&(clip, view.unwrap_or(0)))
            .map(|img| img.view())
    }

    fn region_of_definition(&self, clip: ClipName, _time: f64) -> Option<RectD> {
        self.images
            .get(&(clip, 0))
            .map(|img| img.bounds().to_canonical(img.view().render_scale()))
    }
}
