//! Command line construction
//!
//! Joins an argv into the single command string carried by an SSH `exec`
//! request, and splits `[user@]host[:port]` targets.

use super::options::DEFAULT_PORT;

/// Join arguments into one shell command string
///
/// Arguments containing whitespace or `"` are wrapped in double quotes,
/// with embedded `"` escaped as `\"`. Other arguments pass through as-is.
///
/// # Examples
/// ```
/// use ssh_exec::ssh::sanitize::command_string;
///
/// assert_eq!(command_string(&["echo", "hi"]), "echo hi");
/// assert_eq!(command_string(&["echo", "hello world"]), "echo \"hello world\"");
/// ```
pub fn command_string<S: AsRef<str>>(args: &[S]) -> String {
    let mut out = String::new();

    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }

        let arg = arg.as_ref();
        let needs_quotes = arg.chars().any(|c| c.is_whitespace() || c == '"');
        if !needs_quotes {
            out.push_str(arg);
            continue;
        }

        out.push('"');
        for c in arg.chars() {
            if c == '"' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }

    out
}

/// Split `user@host` into `(user, host)`; user is empty when absent
///
/// Only the first `@` separates the user.
pub fn split_user_host(target: &str) -> (&str, &str) {
    match target.split_once('@') {
        Some((user, host)) => (user, host),
        None => ("", target),
    }
}

/// Split an optional trailing `:port` off a host
///
/// Bracketed IPv6 literals (`[::1]:22`) are unbracketed. A bare IPv6
/// literal or a non-numeric suffix is returned whole with no port.
pub fn split_host_port(host: &str) -> (&str, Option<u16>) {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (addr, port);
        }
        return (host, None);
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        _ => (host, None),
    }
}

/// Resolve the port: explicit option, then host suffix, then 22
pub fn resolve_port(option: Option<u16>, from_host: Option<u16>) -> u16 {
    option.or(from_host).unwrap_or(DEFAULT_PORT)
}
