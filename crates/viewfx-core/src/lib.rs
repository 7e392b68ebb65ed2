//! # viewfx-core
//!
//! Core types shared by the ViewFx effects.
//! Pixel buffers and views, geometry, parameter storage, the host contract,
//! the row-band tile scheduler, configuration and error types.

pub mod config;
pub mod error;
pub mod geometry;
pub mod host;
pub mod image;
pub mod params;
pub mod tiles;

pub use config::*;

pub use error::{RenderStatus, ViewFxError, ViewFxResult};
pub use geometry::{PointD, RectD, RectI, RenderScale};
pub use host::{
    AbortFlag, ClipName, Host, HostDescription, ImageEffect, ImageSource, LocalHost,
    MemorySource, MessageKind, PluginDescriptor, ProjectInfo, RenderArgs, RoiSetter,
};
pub use image::{
    BitDepth, Components, Field, ImageBuffer, ImageMut, ImageRef, Pixel, PixelData, PixelSlice,
    PixelSliceMut, Plane, PlaneMut,
};
pub use params::{Curve, Keyframe, Keyframes, ParamSet, ParamStore, ParamValue};
pub use tiles::{BandMut, TileScheduler};
