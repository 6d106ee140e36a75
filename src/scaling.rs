//! Conversion between raw register values and the values shown to people.
//!
//! Only presentation code should use these. Values exchanged with the controller are always raw.

/// Divide the raw value by the register scale. Scales of 0 and 1 leave the value unchanged.
pub fn to_display(raw: i32, scale: u16) -> f64 {
    if scale <= 1 { f64::from(raw) } else { f64::from(raw) / f64::from(scale) }
}

/// Multiply a displayed value by the register scale and round it to the nearest raw value.
pub fn to_raw(display: f64, scale: u16) -> i32 {
    let scale = if scale <= 1 { 1.0 } else { f64::from(scale) };
    (display * scale).round() as i32
}

/// A raw value formatted according to its register scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scaled {
    pub raw: i32,
    pub scale: u16,
}

impl Scaled {
    pub fn new(raw: i32, scale: u16) -> Self {
        Self { raw, scale }
    }

    pub fn to_display(&self) -> f64 {
        to_display(self.raw, self.scale)
    }
}

impl std::fmt::Display for Scaled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale <= 1 {
            f.write_fmt(format_args!("{}", self.raw))
        } else {
            f.write_fmt(format_args!("{}", self.to_display()))
        }
    }
}

impl serde::Serialize for Scaled {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.scale <= 1 {
            serializer.serialize_i32(self.raw)
        } else {
            serializer.serialize_f64(self.to_display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_divides_by_scale() {
        assert_eq!(to_display(225, 10), 22.5);
        assert_eq!(to_display(-10, 10), -1.0);
        assert_eq!(to_display(1550, 100), 15.5);
        assert_eq!(to_display(225, 1), 225.0);
        assert_eq!(to_display(225, 0), 225.0);
    }

    #[test]
    fn raw_multiplies_and_rounds() {
        assert_eq!(to_raw(22.5, 10), 225);
        assert_eq!(to_raw(15.5, 100), 1550);
        assert_eq!(to_raw(-5.0, 10), -50);
        assert_eq!(to_raw(0.1 + 0.2, 10), 3);
        assert_eq!(to_raw(7.0, 1), 7);
        assert_eq!(to_raw(7.4, 0), 7);
    }

    #[test]
    fn formatting() {
        assert_eq!(Scaled::new(225, 10).to_string(), "22.5");
        assert_eq!(Scaled::new(220, 10).to_string(), "22");
        assert_eq!(Scaled::new(-10, 10).to_string(), "-1");
        assert_eq!(Scaled::new(1234, 100).to_string(), "12.34");
        assert_eq!(Scaled::new(42, 1).to_string(), "42");
        assert_eq!(serde_json::to_string(&Scaled::new(225, 10)).unwrap(), "22.5");
        assert_eq!(serde_json::to_string(&Scaled::new(3, 1)).unwrap(), "3");
    }
}
