/// Assumed organic click-through rate for result positions 1 through 20.
pub const CTR_TABLE: [f64; 20] = [
    0.3844, 0.1907, 0.1134, 0.0770, 0.0546, 0.0409, 0.0315, 0.0249, 0.0199, 0.0171, 0.0177,
    0.0192, 0.0192, 0.0188, 0.0189, 0.0173, 0.0163, 0.0152, 0.0142, 0.0131,
];

/// Monthly visits a ranking is expected to earn: `CTR[position - 1] * volume`
/// rounded to the nearest whole visit, halves to even.
/// Zero when either input is missing or the position is off the table.
pub fn estimated_traffic(position: Option<u32>, search_volume: Option<u64>) -> u64 {
    let (Some(position), Some(volume)) = (position, search_volume) else {
        return 0;
    };

    match (position as usize).checked_sub(1).and_then(|i| CTR_TABLE.get(i)) {
        Some(ctr) => (ctr * volume as f64).round_ties_even() as u64,
        None => 0,
    }
}
