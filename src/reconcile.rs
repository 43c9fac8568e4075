//! Presentation timestamp reconciliation.
//!
//! Decoders with look-ahead (B-frame reordering, frame threading) return a
//! picture one or more packets after the packet that carried it. The packet
//! that completes a picture therefore reports the timestamp of a *later*
//! picture. [`TimestampReconciler`] keeps one pending timestamp from packets
//! that did not complete a picture and prefers it over the fresh value when
//! a picture finally comes out.
//!
//! Timestamps are `Option<i64>`: `None` is the library's "no value" marker,
//! and negative values are kept as-is so that "missing" and "garbage" stay
//! distinguishable.

/// Timestamps carried by the packet that was just fed to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketTimestamps {
    /// Decoding timestamp, in native stream units.
    pub dts: Option<i64>,
    /// Presentation timestamp, in native stream units.
    pub pts: Option<i64>,
}

impl PacketTimestamps {
    /// Timestamps with both fields present.
    pub fn new(dts: i64, pts: i64) -> Self {
        Self {
            dts: Some(dts),
            pts: Some(pts),
        }
    }

    /// Timestamps for a packet that only carries a decoding timestamp.
    pub fn dts_only(dts: i64) -> Self {
        Self {
            dts: Some(dts),
            pts: None,
        }
    }

    /// Timestamps for a packet that carries nothing usable.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Recovers the presentation timestamp of each decoded picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampReconciler {
    average_timestamps_per_frame: i64,
    last_decoded: Option<i64>,
    buffered: Option<i64>,
    current: i64,
}

impl TimestampReconciler {
    /// Create a reconciler for a stream whose frames are, on average,
    /// `average_timestamps_per_frame` native units apart.
    pub fn new(average_timestamps_per_frame: i64) -> Self {
        Self {
            average_timestamps_per_frame,
            last_decoded: None,
            buffered: None,
            current: 0,
        }
    }

    /// The timestamp of the most recently completed picture.
    pub fn current(&self) -> i64 {
        self.current
    }

    /// The timestamp of the previous completed picture, if any.
    pub fn last_decoded(&self) -> Option<i64> {
        self.last_decoded
    }

    /// The pending timestamp held back from a non-completing packet, if any.
    pub fn buffered(&self) -> Option<i64> {
        self.buffered
    }

    /// Feed the timestamps of one decode step.
    ///
    /// Returns the reconciled timestamp when `completed` is true, `None`
    /// otherwise.
    pub fn observe(&mut self, timestamps: PacketTimestamps, completed: bool) -> Option<i64> {
        let pts = timestamps.pts.filter(|&pts| pts >= 0);

        match (pts, completed) {
            (None, true) => {
                self.current = match timestamps.dts.filter(|&dts| dts >= 0) {
                    None => match self.buffered.take() {
                        Some(pending) => pending,
                        None => self
                            .last_decoded
                            .map_or(0, |last| last + self.average_timestamps_per_frame),
                    },
                    Some(dts) => self.swap_pending(dts).unwrap_or(dts),
                };
            }
            (None, false) => {
                self.buffered = match timestamps.dts {
                    Some(dts) if dts >= 0 => Some(dts),
                    Some(_) => None,
                    None => Some(0),
                };
                return None;
            }
            (Some(pts), true) => {
                self.current = self.swap_pending(pts).unwrap_or(pts);
            }
            (Some(pts), false) => {
                self.buffered = Some(pts);
                return None;
            }
        }

        self.last_decoded = Some(self.current);
        log::trace!(
            "reconciled timestamp {} (dts={:?}, pts={:?}, pending={:?})",
            self.current,
            timestamps.dts,
            timestamps.pts,
            self.buffered
        );
        Some(self.current)
    }

    /// If a pending value older than `fresh` exists, return it and keep
    /// `fresh` pending instead.
    fn swap_pending(&mut self, fresh: i64) -> Option<i64> {
        match self.buffered {
            Some(pending) if pending < fresh => {
                self.buffered = Some(fresh);
                Some(pending)
            }
            _ => None,
        }
    }

    /// Forget the pending value. Called after a decoder flush, which drops
    /// the picture the pending value belonged to.
    pub fn discard_pending(&mut self) {
        self.buffered = None;
    }

    /// Return to the freshly-loaded state.
    pub fn reset(&mut self) {
        self.last_decoded = None;
        self.buffered = None;
        self.current = 0;
    }

    /// Change the average frame spacing used to extrapolate missing timestamps.
    pub fn set_average_timestamps_per_frame(&mut self, value: i64) {
        self.average_timestamps_per_frame = value;
    }
}
