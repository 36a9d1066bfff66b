//! Annex B NAL unit helpers

/// `nal_unit_type` values this crate cares about
pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

/// Split an Annex B stream into NAL units, start codes included.
///
/// Bytes before the first start code are dropped.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let starts = start_code_positions(data);
    let mut units = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(data.len());
        units.push(&data[start..end]);
    }
    units
}

/// Type of a NAL unit that still carries its start code.
pub fn nal_type(unit: &[u8]) -> Option<u8> {
    let header = if unit.starts_with(&[0, 0, 0, 1]) {
        4
    } else if unit.starts_with(&[0, 0, 1]) {
        3
    } else {
        return None;
    };
    unit.get(header).map(|b| b & 0x1F)
}

pub fn is_parameter_set(unit: &[u8]) -> bool {
    matches!(nal_type(unit), Some(NAL_SPS) | Some(NAL_PPS))
}

/// Whether the access unit carries an SPS.
pub fn contains_sps(data: &[u8]) -> bool {
    split_annex_b(data)
        .iter()
        .any(|unit| nal_type(unit) == Some(NAL_SPS))
}

/// Separate parameter sets from picture data: `(sps_pps, rest)`.
pub fn split_parameter_sets(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut config = Vec::new();
    let mut rest = Vec::new();
    for unit in split_annex_b(data) {
        if is_parameter_set(unit) {
            config.extend_from_slice(unit);
        } else {
            rest.extend_from_slice(unit);
        }
    }
    (config, rest)
}

fn start_code_positions(data: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            // fold the leading zero of a 4-byte start code in
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            positions.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }
    positions
}
