//! Administrative command interpreter.
//!
//! East clients can interleave `?`-prefixed query commands with data on the
//! same connection. The interpreter is a pure function of the command bytes
//! and the two registries' current counts, which keeps it trivially
//! testable; the east handler owns socket I/O and registry access.
//!
//! Commands are matched and echoed as raw bytes: a malformed command does
//! not have to be valid UTF-8 to be reported back verbatim. An unknown
//! command is answered, not treated as a fault — the issuing client stays
//! connected.

/// Trims trailing ASCII whitespace (space, `\t`, `\n`, `\r`, vertical tab,
/// form feed) from a received command.
pub fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C))
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

/// Computes the response for one administrative command.
///
/// `cmd` is the command with trailing whitespace already trimmed (see
/// [`trim_trailing_whitespace`]). Responses to known commands end in
/// `ok\n`; the unknown-command error echoes the command bytes verbatim and
/// carries no trailing newline.
pub fn respond(cmd: &[u8], west_count: usize, east_count: usize) -> Vec<u8> {
    match cmd {
        b"?ping" => b"ok\n".to_vec(),
        b"?count west" => format!("{west_count}\nok\n").into_bytes(),
        b"?count east" => format!("{east_count}\nok\n").into_bytes(),
        _ => {
            let mut resp = b"error: unknown multiplexer command ".to_vec();
            resp.extend_from_slice(cmd);
            resp
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
