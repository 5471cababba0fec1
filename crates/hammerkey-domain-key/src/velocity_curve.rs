use once_cell::sync::OnceCell;

pub const VELOCITY_CURVE_LEN: usize = 1024;

static SHARED: OnceCell<VelocityCurve> = OnceCell::new();

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VelocityCurve {
    table: Vec<u8>,
}

impl VelocityCurve {
    /// The table every key reads. Built on first use, immutable afterwards.
    pub fn shared() -> &'static VelocityCurve {
        SHARED.get_or_init(|| {
            log::debug!("building velocity curve ({VELOCITY_CURVE_LEN} entries)");
            VelocityCurve::linear(VELOCITY_CURVE_LEN)
        })
    }

    /// `value[i] = round(127 * i / len)`.
    pub fn linear(len: usize) -> Self {
        let len = len.max(1);
        let table = (0..len)
            .map(|i| (127.0 * i as f64 / len as f64).round() as u8)
            .collect();
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// `round(hammer_speed * scaler)` clamped into the table. Negative and non-finite speeds map to 0.
    pub fn index_for(&self, hammer_speed: f32, scaler: f32) -> usize {
        let scaled = (hammer_speed * scaler).round();
        if !(scaled > 0.0) {
            return 0;
        }
        (scaled as usize).min(self.table.len() - 1)
    }

    pub fn velocity_at(&self, index: usize) -> u8 {
        self.table[index.min(self.table.len() - 1)]
    }

    pub fn values(&self) -> &[u8] {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_curve_spans_the_midi_range() {
        let curve = VelocityCurve::shared();
        assert_eq!(curve.len(), VELOCITY_CURVE_LEN);
        assert_eq!(curve.velocity_at(0), 0);
        assert_eq!(curve.velocity_at(VELOCITY_CURVE_LEN - 1), 127);
        assert!(curve.values().windows(2).all(|w| w[0] <= w[1]));
        assert!(curve.values().iter().all(|v| *v <= 127));
    }

    #[test]
    fn shared_curve_is_built_once() {
        let a = VelocityCurve::shared() as *const VelocityCurve;
        let b = VelocityCurve::shared() as *const VelocityCurve;
        assert_eq!(a, b);
    }

    #[test]
    fn index_is_clamped_on_both_sides() {
        let curve = VelocityCurve::linear(1024);
        assert_eq!(curve.index_for(-0.5, 1000.0), 0);
        assert_eq!(curve.index_for(10.0, 1000.0), 1023);
        assert_eq!(curve.index_for(f32::NAN, 1000.0), 0);
        assert_eq!(curve.index_for(0.1, 1000.0), 100);
    }
}
