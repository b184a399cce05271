//! Terminal defaults for interactive sessions.

use russh::Pty;

/// Terminal type requested when the caller does not supply one.
pub const DEFAULT_TERM: &str = "xterm";

/// Pty modes sent with every interactive pty request.
///
/// The list is a fixed, ordered sequence so the encoded request is
/// byte-identical across runs: local echo on, status reporting enabled,
/// and nominal 14.4k line speeds which servers treat as "fast enough to
/// not throttle".
pub fn interactive_pty_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 1),
        (Pty::VSTATUS, 1),
        (Pty::TTY_OP_ISPEED, 14400),
        (Pty::TTY_OP_OSPEED, 14400),
    ]
}
