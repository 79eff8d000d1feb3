//! Readiness classification of emulator diagnostic output.
//!
//! The emulator has no readiness API; the only signal is its diagnostic
//! (stderr) stream. Each line is classified independently and the launcher
//! acts on the first non-pending signal. The classifier is a pure function
//! so it can be exercised against captured transcripts without spawning
//! anything.

// ============================================================================
// Constants
// ============================================================================

/// Emitted once the emulator has resolved its SDK and finished internal
/// initialization.
const READY_MARKER: &str = "using SDK";

/// Emitted by the container runtime when the instance name is already taken
/// by a stale container.
const NAME_CONFLICT_MARKER: &str = "is already in use by container";

/// Emitted when one of the mapped host ports is already bound.
const PORT_CONFLICT_MARKER: &str = "address already in use";

/// Marks diagnostic lines echoing APDU traffic, which are dropped from the
/// logs (one per exchange, far too noisy).
const APDU_ECHO_MARKER: &str = "apdu: ";

// ============================================================================
// ReadinessSignal
// ============================================================================

/// Classification of one diagnostic line during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessSignal {
    /// Nothing decisive yet; keep reading.
    Pending,

    /// Internal initialization finished; the instance is (almost) ready.
    ///
    /// The sockets are not accept-ready the instant this line appears, so
    /// the launcher still applies a settle delay before connecting.
    Ready,

    /// A host port of the block is already bound; retryable with a fresh
    /// block.
    PortConflict,

    /// The instance name is taken by a stale container; not retryable,
    /// requires operator cleanup.
    Fatal,
}

// ============================================================================
// Classification
// ============================================================================

/// Classifies one diagnostic line.
///
/// Markers are checked in order of decisiveness; a line matching none of
/// them is [`ReadinessSignal::Pending`].
#[must_use]
pub fn classify_line(line: &str) -> ReadinessSignal {
    if line.contains(READY_MARKER) {
        ReadinessSignal::Ready
    } else if line.contains(NAME_CONFLICT_MARKER) {
        ReadinessSignal::Fatal
    } else if line.contains(PORT_CONFLICT_MARKER) {
        ReadinessSignal::PortConflict
    } else {
        ReadinessSignal::Pending
    }
}

/// Returns `true` for diagnostic lines that echo APDU traffic.
#[inline]
#[must_use]
pub(crate) fn is_apdu_echo(line: &str) -> bool {
    line.contains(APDU_ECHO_MARKER)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_sdk_line_is_ready() {
        let line = "speculos.seproxyhal: using SDK version 2.1 on nanos";
        assert_eq!(classify_line(line), ReadinessSignal::Ready);
    }

    #[test]
    fn test_name_collision_is_fatal() {
        let line = "docker: Error response from daemon: Conflict. The container name \
                    \"/speculos-2\" is already in use by container \"4fc31a\". You have \
                    to remove (or rename) that container to be able to reuse that name.";
        assert_eq!(classify_line(line), ReadinessSignal::Fatal);
    }

    #[test]
    fn test_bound_port_is_conflict() {
        let line = "docker: Error response from daemon: Ports are not available: \
                    listen tcp 0.0.0.0:40002: bind: address already in use";
        assert_eq!(classify_line(line), ReadinessSignal::PortConflict);
    }

    #[test]
    fn test_ordinary_output_is_pending() {
        let transcript = [
            "",
            "speculos.mcu: starting vnc server on port 41002",
            "Loading app app_2.4.1.elf",
            "speculos.apdu: waiting for connection",
        ];
        for line in transcript {
            assert_eq!(classify_line(line), ReadinessSignal::Pending, "line: {line}");
        }
    }

    #[test]
    fn test_ready_wins_over_later_markers() {
        // A line carrying the ready marker is ready no matter what else the
        // emulator packed into it.
        let line = "using SDK (apdu: address already in use echo)";
        assert_eq!(classify_line(line), ReadinessSignal::Ready);
    }

    #[test]
    fn test_apdu_echo_detection() {
        assert!(is_apdu_echo("speculos.apdu: < e0040000"));
        assert!(!is_apdu_echo("speculos.seproxyhal: display rendered"));
    }

    proptest! {
        #[test]
        fn test_conflict_survives_padding(
            prefix in "[A-Za-z0-9:._/-]{0,40}",
            suffix in "[A-Za-z0-9:._/-]{0,40}",
        ) {
            let line = format!("{prefix}address already in use{suffix}");
            prop_assert_eq!(classify_line(&line), ReadinessSignal::PortConflict);
        }

        #[test]
        fn test_ready_survives_padding(
            prefix in "[A-Za-z0-9:._/-]{0,40}",
            suffix in "[A-Za-z0-9:._/-]{0,40}",
        ) {
            let line = format!("{prefix}using SDK{suffix}");
            prop_assert_eq!(classify_line(&line), ReadinessSignal::Ready);
        }
    }
}
