//! Track binder: routes track `i` to voice `i`

use tracing::debug;

use crate::pipeline::Pipeline;
use crate::sequence::{Sequence, SequenceError};

/// Route each track with a matching voice to that voice
///
/// Tracks beyond the voice count stay unrouted and silent; voices beyond the
/// track count get nothing. Returns how many tracks were bound.
pub fn bind_tracks(sequence: &mut Sequence, pipeline: &Pipeline) -> Result<usize, SequenceError> {
    let mut bound = 0;
    for voice in pipeline.voices() {
        if voice.index >= sequence.track_count() {
            continue;
        }
        sequence.set_destination(voice.index, voice.node)?;
        bound += 1;
    }

    debug!(
        bound,
        tracks = sequence.track_count(),
        voices = pipeline.voice_count(),
        "tracks bound"
    );
    Ok(bound)
}
