//! Unit conversions from raw logged columns to physical quantities, kept on
//! [`super::header::SystemConfig`] since every one of them is a pure function of header
//! scalars plus a single raw sample.

use super::header::SystemConfig;

/// Nominal single-cell voltage band used to estimate pack cell count from `vbatLatest`,
/// in the same units as `vbatref`/`vbatcellvoltage` (centivolts).
const CELL_VOLTAGE_MAX: u32 = 440;

impl SystemConfig {
    /// Estimates the number of battery cells from a vbat ADC sample, the same way a
    /// logger with no `vbatcellvoltage.max` override falls back to a fixed per-cell
    /// ceiling: divide the scaled voltage by the per-cell maximum and round up.
    pub fn estimate_cell_count(&self, vbat_latest: u16) -> u8 {
        let millivolts = self.vbat_adc_to_millivolts(vbat_latest);
        let max_cell_centivolts = if self.vbat_cell_voltage.max > 0 {
            self.vbat_cell_voltage.max as u32
        } else {
            CELL_VOLTAGE_MAX
        };
        if max_cell_centivolts == 0 {
            return 1;
        }
        let centivolts = millivolts / 10;
        (centivolts / max_cell_centivolts + 1).max(1) as u8
    }

    /// `vbatscale` is the millivolt value of a full-scale (4095) ADC reading; this scales
    /// linearly down from there.
    pub fn vbat_adc_to_millivolts(&self, adc: u16) -> u32 {
        (adc as u32 * self.vbat_scale as u32 * 330) / 0xFFF
    }

    /// `currentMeter` is `(offset, scale)` in the same convention as Betaflight's ADC
    /// current sensor calibration: `milliamps = (adc * scale / 4096 - offset) / 100 * 10`.
    pub fn amperage_adc_to_milliamps(&self, adc: u16) -> i32 {
        let scale = self.current_meter.scale as i64;
        let offset = self.current_meter.offset as i64;
        let millivolts = (adc as i64 * 330) / 0xFFF;
        (((millivolts * scale) / 1000) - offset) as i32
    }

    /// `gyro_scale` is pre-converted to radians/microsecond in [`super::header::parse_headers`];
    /// the logger's raw samples are in that same per-microsecond unit, so converting to
    /// radians/second only needs the microsecond-to-second factor.
    pub fn gyro_raw_to_rad_per_sec(&self, raw: i32) -> f64 {
        raw as f64 * self.gyro_scale as f64 * 1_000_000.0
    }

    /// `acc_1g` is the ADC reading corresponding to one standard gravity.
    pub fn accel_raw_to_g(&self, raw: i32) -> f64 {
        if self.acc_1g == 0 {
            return 0.0;
        }
        raw as f64 / self.acc_1g as f64
    }
}

#[cfg(test)]
mod tests {
    use super::super::header::{CurrentMeter, VbatCellVoltage};
    use super::*;

    #[test]
    fn vbat_scale_maps_full_scale_adc_to_scale_millivolts() {
        let mut cfg = SystemConfig::default();
        cfg.vbat_scale = 110;
        assert_eq!(cfg.vbat_adc_to_millivolts(0xFFF), 110 * 330);
    }

    #[test]
    fn accel_raw_divides_by_one_g_reference() {
        let mut cfg = SystemConfig::default();
        cfg.acc_1g = 2048;
        assert!((cfg.accel_raw_to_g(2048) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn accel_with_no_reference_returns_zero_rather_than_dividing_by_zero() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.accel_raw_to_g(1000), 0.0);
    }

    #[test]
    fn cell_count_estimate_rounds_up_from_vbat() {
        let mut cfg = SystemConfig::default();
        cfg.vbat_scale = 110;
        cfg.vbat_cell_voltage = VbatCellVoltage {
            min: 330,
            warning: 350,
            max: 430,
        };
        // 3s pack near full charge: ~12.4V
        let adc = (12_400u32 * 0xFFF / (110 * 330)) as u16;
        assert_eq!(cfg.estimate_cell_count(adc), 3);
    }

    #[test]
    fn amperage_offset_is_subtracted_after_scaling() {
        let mut cfg = SystemConfig::default();
        cfg.current_meter = CurrentMeter {
            offset: 0,
            scale: 400,
        };
        assert_eq!(cfg.amperage_adc_to_milliamps(0), 0);
    }
}
