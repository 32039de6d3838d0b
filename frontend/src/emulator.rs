use std::time::{Duration, Instant};

use dotmatrix_core::error::SessionError;
use dotmatrix_core::persistence::crc32;
use dotmatrix_core::session::SessionController;

use crate::input::{InputScript, ScriptCursor};

#[derive(Debug, Clone, Copy)]
pub struct PumpOptions {
    pub frames: u64,
    /// Target rate in Hz; `None` runs as fast as the engine allows.
    pub frame_rate: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub frames: u64,
    pub elapsed: Duration,
    /// Frames that finished after their deadline.
    pub late_frames: u64,
    /// CRC-32 of the last frame shown.
    pub last_frame_crc: u32,
}

/// Pull `options.frames` frames from `session`, applying `script` as the
/// frame counter reaches each entry.
pub fn run(
    session: &mut SessionController,
    script: &InputScript,
    options: PumpOptions,
) -> Result<PumpReport, SessionError> {
    let period = options
        .frame_rate
        .map(|hz| Duration::from_secs(1) / hz.max(1));
    let mut cursor = ScriptCursor::new(script);
    let started = Instant::now();
    let mut deadline = started;
    let mut late_frames = 0;
    let mut last_frame_crc = 0;

    for frame in 0..options.frames {
        if let Some(event) = cursor.advance_to(frame) {
            tracing::trace!(frame, ?event, "script input");
            session.set_direction(event.direction);
            session.set_action_buttons(event.buttons);
        }

        last_frame_crc = crc32(session.next_frame()?);

        let Some(period) = period else {
            continue;
        };
        deadline += period;
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        } else if now - deadline > period {
            // More than a frame behind: restart the schedule from now.
            late_frames += 1;
            tracing::debug!(frame, behind = ?(now - deadline), "frame pump behind");
            deadline = now;
        } else {
            late_frames += 1;
        }
    }

    Ok(PumpReport {
        frames: options.frames,
        elapsed: started.elapsed(),
        late_frames,
        last_frame_crc,
    })
}
