//! Focal-point parsing for media uploads and updates.

use crate::model::MediaFocus;

/// Errors from parsing a focus specification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FocusError {
    #[error("focus {0:?} must be two comma-separated floats")]
    Shape(String),
    #[error("focus {axis} value {value} is outside [-1, 1]")]
    OutOfRange { axis: char, value: f32 },
}

/// Parses `"x,y"` into a [`MediaFocus`]. An empty string means centred (`0,0`).
///
/// # Errors
///
/// Returns [`FocusError::Shape`] when the input is not two floats and
/// [`FocusError::OutOfRange`] when either value lies outside `[-1, 1]`.
pub fn parse_focus(input: &str) -> Result<MediaFocus, FocusError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(MediaFocus::default());
    }

    let shape = || FocusError::Shape(input.to_string());
    let (x, y) = input.split_once(',').ok_or_else(shape)?;
    let x: f32 = x.trim().parse().map_err(|_| shape())?;
    let y: f32 = y.trim().parse().map_err(|_| shape())?;

    for (axis, value) in [('x', x), ('y', y)] {
        if !(-1.0..=1.0).contains(&value) {
            return Err(FocusError::OutOfRange { axis, value });
        }
    }
    Ok(MediaFocus { x, y })
}
