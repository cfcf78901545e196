pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes.max(0.0);
    let mut unit_idx = 0usize;
    while value >= 1024.0 && unit_idx < UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{} B", value.round() as u64)
    } else {
        format!("{value:.2} {}", UNITS[unit_idx])
    }
}

pub fn format_u64_commas(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_stay_integral_below_a_kilobyte() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(6.0), "6 B");
        assert_eq!(format_bytes(1023.4), "1023 B");
    }

    #[test]
    fn larger_sizes_scale_by_1024() {
        assert_eq!(format_bytes(1536.0), "1.50 KB");
        assert_eq!(format_bytes(5.0 * 1024.0 * 1024.0), "5.00 MB");
    }

    #[test]
    fn commas_group_thousands() {
        assert_eq!(format_u64_commas(0), "0");
        assert_eq!(format_u64_commas(1_234_567), "1,234,567");
    }
}
