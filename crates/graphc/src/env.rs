use std::env;
use std::sync::OnceLock;

static GRAPHC_TRACE_MATCHES: OnceLock<bool> = OnceLock::new();
static GRAPHC_VALIDATE_MATCHES: OnceLock<bool> = OnceLock::new();
static GRAPHC_TRACE_COMPILE: OnceLock<bool> = OnceLock::new();
static GRAPHC_FIXED_POINT_ITERS: OnceLock<usize> = OnceLock::new();

const DEFAULT_FIXED_POINT_ITERS: usize = 8;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_flag(cell: &OnceLock<bool>, key: &str) -> bool {
    *cell.get_or_init(|| match env::var(key) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Logs every successful match and the rule that fired.
pub(crate) fn trace_matches() -> bool {
    read_flag(&GRAPHC_TRACE_MATCHES, "GRAPHC_TRACE_MATCHES")
}

/// Re-validates the module after every individual rewrite.
pub(crate) fn validate_matches() -> bool {
    read_flag(&GRAPHC_VALIDATE_MATCHES, "GRAPHC_VALIDATE_MATCHES")
}

/// Logs the module text after every compile pass.
pub(crate) fn trace_compile() -> bool {
    read_flag(&GRAPHC_TRACE_COMPILE, "GRAPHC_TRACE_COMPILE")
}

pub(crate) fn fixed_point_iters() -> usize {
    *GRAPHC_FIXED_POINT_ITERS.get_or_init(|| match env::var("GRAPHC_FIXED_POINT_ITERS") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|iters| *iters > 0)
            .unwrap_or(DEFAULT_FIXED_POINT_ITERS),
        Err(_) => DEFAULT_FIXED_POINT_ITERS,
    })
}
