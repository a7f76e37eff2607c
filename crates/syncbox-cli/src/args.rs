//! Argument preprocessing ahead of clap.

use std::ffi::OsString;

const CONNECTOR_PREFIXES: [&str; 2] = ["--src.", "--dst."];

/// Rewrite `--src.key=value` and `--src.key value` (and the `--dst.` forms)
/// into `--set src.key=value`, keeping argument order.
///
/// Anything else, including non-UTF-8 arguments, passes through untouched.
pub fn expand_connector_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut args = args.into_iter().peekable();
    while let Some(arg) = args.next() {
        let Some(key) = arg
            .to_str()
            .filter(|s| CONNECTOR_PREFIXES.iter().any(|p| s.starts_with(p)))
            .map(|s| s.trim_start_matches('-').to_string())
        else {
            out.push(arg);
            continue;
        };

        if key.contains('=') {
            out.push("--set".into());
            out.push(key.into());
            continue;
        }
        match args.peek().and_then(|next| next.to_str()) {
            Some(value) if !value.starts_with("--") => {
                let value = value.to_string();
                args.next();
                out.push("--set".into());
                out.push(format!("{key}={value}").into());
            }
            _ => out.push(arg),
        }
    }
    out
}
