//! Checks run before any pixel of a render call is touched.

use viewfx_core::{
    ClipName, Field, Host, ImageMut, ImageRef, MessageKind, RenderArgs, ViewFxError, ViewFxResult,
};

pub(crate) const WRONG_SCALE_OR_FIELD: &str = "Host gave image with wrong scale or field properties";

/// Reject a destination whose render scale or field disagrees with the request.
///
/// A destination carrying no field (`Field::None`) is accepted for any
/// requested field. The user also gets a persistent error on the instance.
pub fn check_destination(host: &dyn Host, args: &RenderArgs, dst: &ImageMut<'_>) -> ViewFxResult<()> {
    let scale = dst.render_scale();
    let field = dst.field();
    let scale_ok = scale.x == args.render_scale.x && scale.y == args.render_scale.y;
    let field_ok = field == Field::None || field == args.field;
    if scale_ok && field_ok {
        return Ok(());
    }
    host.set_persistent_message(MessageKind::Error, WRONG_SCALE_OR_FIELD);
    Err(ViewFxError::GeometryMismatch {
        message: format!(
            "destination has scale ({}, {}) and field {:?}, render asked for ({}, {}) and {:?}",
            scale.x, scale.y, field, args.render_scale.x, args.render_scale.y, args.field
        ),
    })
}

/// Sources must share bit depth and component layout with the destination.
pub fn check_source(clip: &str, src: &ImageRef<'_>, dst: &ImageMut<'_>) -> ViewFxResult<()> {
    if src.depth() == dst.depth() && src.components() == dst.components() {
        return Ok(());
    }
    Err(ViewFxError::FormatMismatch {
        clip: clip.to_string(),
        expected_depth: dst.depth(),
        expected_components: dst.components(),
        found_depth: src.depth(),
        found_components: src.components(),
    })
}

pub(crate) fn require_destination<'a>(dst: Option<ImageMut<'a>>) -> ViewFxResult<ImageMut<'a>> {
    dst.ok_or_else(|| ViewFxError::missing_image(ClipName::Output.to_string()))
}
