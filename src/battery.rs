//! Battery discharge profiles.
//!
//! Devices reporting only `batteryVoltage` (0x0020, in 100 mV units) get a
//! percentage from the discharge curve of the configured battery type.

use serde::{Deserialize, Serialize};

/// Battery fitted in the device, selected in the device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BatteryType {
    #[default]
    #[serde(rename = "CR2032")]
    Cr2032,
    #[serde(rename = "CR2450")]
    Cr2450,
    #[serde(rename = "AAA")]
    Aaa,
    #[serde(rename = "AA")]
    Aa,
    #[serde(rename = "2xAAA")]
    TwoAaa,
    #[serde(rename = "2xAA")]
    TwoAa,
    #[serde(rename = "4xAAA")]
    FourAaa,
}

// (volts, percent), descending voltage
const CR2032_CURVE: &[(f64, f64)] = &[
    (3.30, 100.0),
    (3.10, 98.0),
    (3.00, 95.0),
    (2.95, 90.0),
    (2.90, 85.0),
    (2.85, 75.0),
    (2.80, 65.0),
    (2.75, 50.0),
    (2.70, 40.0),
    (2.60, 25.0),
    (2.50, 15.0),
    (2.40, 8.0),
    (2.30, 4.0),
    (2.20, 2.0),
    (2.00, 0.0),
];

const CR2450_CURVE: &[(f64, f64)] = &[
    (3.30, 100.0),
    (3.10, 98.0),
    (3.00, 95.0),
    (2.95, 90.0),
    (2.90, 85.0),
    (2.85, 75.0),
    (2.80, 65.0),
    (2.75, 50.0),
    (2.70, 40.0),
    (2.60, 25.0),
    (2.50, 15.0),
    (2.40, 8.0),
    (2.30, 4.0),
    (2.00, 0.0),
];

const ALKALINE_CELL_CURVE: &[(f64, f64)] = &[
    (1.65, 100.0),
    (1.55, 95.0),
    (1.50, 90.0),
    (1.45, 80.0),
    (1.40, 70.0),
    (1.35, 60.0),
    (1.30, 50.0),
    (1.25, 40.0),
    (1.20, 30.0),
    (1.15, 20.0),
    (1.10, 12.0),
    (1.05, 6.0),
    (1.00, 3.0),
    (0.90, 0.0),
];

const ALKALINE_2_CELL_CURVE: &[(f64, f64)] = &[
    (3.30, 100.0),
    (3.10, 95.0),
    (3.00, 90.0),
    (2.90, 80.0),
    (2.80, 70.0),
    (2.70, 60.0),
    (2.60, 50.0),
    (2.50, 40.0),
    (2.40, 30.0),
    (2.30, 20.0),
    (2.20, 12.0),
    (2.00, 5.0),
    (1.80, 0.0),
];

const ALKALINE_4_CELL_CURVE: &[(f64, f64)] = &[
    (6.60, 100.0),
    (6.20, 95.0),
    (6.00, 90.0),
    (5.80, 80.0),
    (5.60, 70.0),
    (5.40, 60.0),
    (5.20, 50.0),
    (5.00, 40.0),
    (4.80, 30.0),
    (4.60, 20.0),
    (4.40, 12.0),
    (4.00, 5.0),
    (3.60, 0.0),
];

impl BatteryType {
    fn curve(self) -> &'static [(f64, f64)] {
        match self {
            BatteryType::Cr2032 => CR2032_CURVE,
            BatteryType::Cr2450 => CR2450_CURVE,
            BatteryType::Aaa | BatteryType::Aa => ALKALINE_CELL_CURVE,
            BatteryType::TwoAaa | BatteryType::TwoAa => ALKALINE_2_CELL_CURVE,
            BatteryType::FourAaa => ALKALINE_4_CELL_CURVE,
        }
    }

    /// Remaining charge in percent, interpolated linearly between curve
    /// points and rounded to a whole percent.
    pub fn percentage(self, volts: f64) -> f64 {
        let curve = self.curve();
        let (Some(&(top_v, top_p)), Some(&(bottom_v, bottom_p))) = (curve.first(), curve.last())
        else {
            return 0.0;
        };
        if volts >= top_v {
            return top_p;
        }
        if volts <= bottom_v {
            return bottom_p;
        }
        for pair in curve.windows(2) {
            let (hi_v, hi_p) = pair[0];
            let (lo_v, lo_p) = pair[1];
            if volts <= hi_v && volts >= lo_v {
                let ratio = (volts - lo_v) / (hi_v - lo_v);
                return (lo_p + ratio * (hi_p - lo_p)).round();
            }
        }
        bottom_p
    }

    /// Percentage for a raw `batteryVoltage` attribute (100 mV units).
    pub fn percentage_from_raw(self, raw: i64) -> f64 {
        self.percentage(raw as f64 / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_cell_curve_is_interpolated() {
        assert_eq!(BatteryType::Cr2032.percentage(3.4), 100.0);
        assert_eq!(BatteryType::Cr2032.percentage(3.0), 95.0);
        assert_eq!(BatteryType::Cr2032.percentage(2.68), 37.0);
        assert_eq!(BatteryType::Cr2032.percentage(1.5), 0.0);
    }

    #[test]
    fn cell_count_changes_the_scale() {
        // 3.0 V is a healthy coin cell but a flat 4xAAA pack
        assert_eq!(BatteryType::Cr2032.percentage_from_raw(30), 95.0);
        assert_eq!(BatteryType::TwoAaa.percentage_from_raw(30), 90.0);
        assert_eq!(BatteryType::FourAaa.percentage_from_raw(30), 0.0);
        assert_eq!(BatteryType::Aaa.percentage_from_raw(13), 50.0);
    }

    #[test]
    fn settings_names_match_the_host() {
        let t: BatteryType = serde_json::from_str("\"2xAAA\"").unwrap();
        assert_eq!(t, BatteryType::TwoAaa);
        assert_eq!(serde_json::to_string(&BatteryType::Cr2032).unwrap(), "\"CR2032\"");
        assert!(serde_json::from_str::<BatteryType>("\"lipo\"").is_err());
    }
}
