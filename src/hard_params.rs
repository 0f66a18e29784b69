/// Hard parameters: values that are always variable
///
/// They are replaced with `<*>` before tokenization, so they never reach the
/// tree routing or the similarity function as literals.
///
/// Two passes:
/// 1. Line level - patterns that span tokens or depend on a prefix
///    (ctime strings, file names after `file:`)
/// 2. Token level - anchored patterns checked per whitespace token
///    (OIDs, MACs, IPv4/IPv6, hex and decimal numbers, channel ids, measurements)
use once_cell::sync::Lazy;
use regex::Regex;

pub const PARAM: &str = "<*>";

/// libc `ctime()` output, e.g. `Fri Jul 19 08:58:23 2019`
static CTIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun) (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) +\d{1,2} \d{2}:\d{2}:\d{2} \d{4}\b",
    )
    .unwrap()
});

static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<pre>\b(?:[Ff]ile(?:name)?|[Pp]ath)\s*[:=]\s*)[^\s<][^\s]*").unwrap()
});

/// Anchored token patterns, checked in order
static TOKEN_PARAMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // SNMP OID
        r"^\.?\d+(?:\.\d+){4,}$",
        // MAC address
        r"^[0-9a-fA-F]{2}(?:[:-][0-9a-fA-F]{2}){5}$",
        // IPv4 with optional prefix length or port
        r"^\d{1,3}(?:\.\d{1,3}){3}(?:/\d{1,2}|:\d{1,5})?$",
        // IPv6
        r"^(?:[0-9a-fA-F]{0,4}:){2,7}[0-9a-fA-F]{0,4}(?:/\d{1,3})?$",
        // hex number
        r"^0[xX][0-9a-fA-F]+$",
        // integer or float
        r"^[-+]?\d+(?:\.\d+)?$",
        // channel identifier
        r"^[Cc][Hh]\d+$",
        // measurement with unit
        r"^[-+]?\d+(?:\.\d+)?(?:dBmV|dB|MHz|KHz|Hz|ms|us|sec|s|%)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// True if a single token is a hard parameter
pub fn is_hard_param(token: &str) -> bool {
    if token == PARAM {
        return true;
    }
    // Separator punctuation that trails a value is kept outside the placeholder
    let core = token.trim_end_matches([',', ';']);
    if core.is_empty() {
        return false;
    }
    // `::` alone or `a::b` style names are not addresses
    if core.contains(':') && !core.bytes().any(|b| b.is_ascii_digit()) {
        return false;
    }
    TOKEN_PARAMS.iter().any(|re| re.is_match(core))
}

fn replace_token(token: &str) -> String {
    let core = token.trim_end_matches([',', ';']);
    let tail = &token[core.len()..];
    if token != PARAM && is_hard_param(token) {
        format!("{}{}", PARAM, tail)
    } else {
        token.to_string()
    }
}

/// Replace hard parameters in a line and return its tokens
pub fn parameterize(line: &str) -> Vec<String> {
    let line = CTIME.replace_all(line, PARAM);
    let line = FILE_NAME.replace_all(&line, "${pre}<*>");
    line.split_whitespace().map(replace_token).collect()
}

/// Space-joined token sequence, the text that event ids are hashed from
pub fn template_text(tokens: &[String]) -> String {
    tokens.join(" ")
}
