/// Engine time in seconds.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct Time(pub f64);

impl Time {
    pub fn seconds_since(self, earlier: Time) -> f64 {
        self.0 - earlier.0
    }
}
