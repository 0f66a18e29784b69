/// Reflow of DS/US channel status table rows into single primary lines
///
/// Tables print one channel per row, column aligned. Another thread may
/// write into the middle of a row, so every row is checked for shape and
/// dropped (never repaired by guessing) when it does not fit.
use tracing::debug;

/// Downstream modulation values as printed by the modem
pub const DS_MODULATIONS: [&str; 4] = ["Qam64", "Qam256", "OFDM PLC", "Unknown"];

const DS_FIELDS: usize = 8;
const US_SCQAM_FIELDS: usize = 9;
const US_OFDMA_FIELDS: usize = 10;

/// Split on whitespace into at most `max` fields; the last field keeps the
/// remainder of the line with inner whitespace intact
pub fn split_fields(line: &str, max: usize) -> Vec<&str> {
    let mut fields = Vec::with_capacity(max);
    let mut rest = line.trim_start();

    while !rest.is_empty() {
        if fields.len() + 1 == max {
            fields.push(rest.trim_end());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                fields.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                fields.push(rest);
                break;
            }
        }
    }

    fields
}

/// Recover a modulation value that another thread's output garbled
fn normalize_modulation(field: &str) -> Option<&'static str> {
    if let Some(known) = DS_MODULATIONS.iter().find(|m| **m == field) {
        return Some(*known);
    }

    let bytes = field.as_bytes();
    match bytes.get(3) {
        Some(b'6') => return Some("Qam64"),
        Some(b'2') => return Some("Qam256"),
        _ => {}
    }
    match bytes.first() {
        Some(b'O') => Some("OFDM PLC"),
        Some(b'U') => Some("Unknown"),
        _ => None,
    }
}

/// `   0*    1   300000000   y    y    35    3    Qam64`
/// becomes
/// `DS channel status rxid 0* dcid 1 freq 300000000 qam y fec y snr 35 power 3 mod Qam64`
pub fn reflow_ds_row(row: &str) -> Option<String> {
    let fields = split_fields(row, DS_FIELDS);
    if fields.len() < DS_FIELDS {
        debug!("DS row truncated ({} fields): {}", fields.len(), row.trim());
        return None;
    }

    let Some(modulation) = normalize_modulation(fields[7]) else {
        debug!("DS row has unknown modulation '{}'", fields[7]);
        return None;
    };
    // Keep OFDM rows the same token length as QAM rows
    let modulation = modulation.replace(' ', "_");

    Some(format!(
        "DS channel status rxid {} dcid {} freq {} qam {} fec {} snr {} power {} mod {}",
        fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6], modulation
    ))
}

/// Map the transmit flag to `y`/`n`, including legacy spellings
fn normalize_flag(field: &str) -> Option<&'static str> {
    match field.as_bytes().first() {
        Some(b'y' | b'Y' | b't' | b'T' | b'1') => Some("y"),
        Some(b'n' | b'N' | b'f' | b'F' | b'0') => Some("n"),
        _ => None,
    }
}

/// Upstream rows come in two shapes:
///
/// SC-QAM (9 fields): `txid ucid freq width power ranged type mod tx`
///
/// OFDMA (10 fields, frequency printed as `start-end`):
/// `txid ucid start-end width power ranged type mod tx spacing`
///
/// Older firmware glues the transmit flag to the modulation (`Qam64/yes`);
/// that trailing field is re-split and the flag normalized to `y` or `n`.
pub fn reflow_us_row(row: &str) -> Option<String> {
    let mut fields: Vec<&str> = row.split_whitespace().collect();

    if fields.len() == US_SCQAM_FIELDS - 1 {
        let (modulation, flag) = fields[7].split_once('/')?;
        fields[7] = modulation;
        fields.push(flag);
    }

    let ofdma = fields.get(2).map_or(false, |f| f.contains('-'));
    let expected = if ofdma { US_OFDMA_FIELDS } else { US_SCQAM_FIELDS };
    if fields.len() != expected {
        debug!("US row has {} fields, expected {}: {}", fields.len(), expected, row.trim());
        return None;
    }

    let tx = normalize_flag(fields[8])?;

    if ofdma {
        let (start, end) = fields[2].split_once('-')?;
        if start.is_empty() || end.is_empty() {
            return None;
        }
        Some(format!(
            "US channel status txid {} ucid {} freqstart {} freqend {} width {} power {} ranged {} type {} mod {} tx {} spacing {}",
            fields[0], fields[1], start, end, fields[3], fields[4], fields[5], fields[6], fields[7], tx, fields[9]
        ))
    } else {
        // SC-QAM has a single frequency; it fills both slots
        Some(format!(
            "US channel status txid {} ucid {} freqstart {} freqend {} width {} power {} ranged {} type {} mod {} tx {}",
            fields[0], fields[1], fields[2], fields[2], fields[3], fields[4], fields[5], fields[6], fields[7], tx
        ))
    }
}
