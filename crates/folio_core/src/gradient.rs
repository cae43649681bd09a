#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Componentwise `self + (other - self) * t`, with `t` in [0, 1].
    pub fn blend(self, other: Rgb, t: f64) -> Rgb {
        let mix = |x: u8, y: u8| {
            let v = f64::from(x) + (f64::from(y) - f64::from(x)) * t;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

/// Evenly spaced color stops; `at(0)` is the first stop and `at(1)` the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearGradient {
    stops: Vec<Rgb>,
}

impl LinearGradient {
    /// Returns `None` for an empty stop list.
    pub fn new(stops: Vec<Rgb>) -> Option<Self> {
        if stops.is_empty() {
            None
        } else {
            Some(Self { stops })
        }
    }

    /// Red through yellow to green.
    pub fn traffic_light() -> Self {
        Self {
            stops: vec![
                Rgb::new(192, 3, 20),
                Rgb::new(255, 255, 0),
                Rgb::new(3, 192, 20),
            ],
        }
    }

    pub fn stops(&self) -> &[Rgb] {
        &self.stops
    }

    pub fn at(&self, t: f64) -> Rgb {
        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];
        if self.stops.len() == 1 || t.is_nan() || t <= 0.0 {
            return first;
        }
        if t >= 1.0 {
            return last;
        }

        let segments = (self.stops.len() - 1) as f64;
        let scaled = t * segments;
        let index = scaled.floor() as usize;
        let local = scaled - index as f64;
        self.stops[index].blend(self.stops[index + 1], local)
    }
}
