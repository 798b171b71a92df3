use std::fmt;

// Though not technically correct, follow convention and use decimal scale
// notation with a binary divisor.
const DIVISOR: f64 = 1024.0;
static SCALE: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// A format utility for human readable byte counts.
#[derive(Clone, Copy, Debug)]
pub struct FileSize(pub u64);

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut size = self.0 as f64;
        let mut scale_idx = 0;

        while size >= DIVISOR && scale_idx + 1 < SCALE.len() {
            size /= DIVISOR;
            scale_idx += 1;
        }

        let scale = SCALE[scale_idx];

        if size.fract() == 0.0 {
            write!(f, "{:.0} {}", size, scale)
        } else {
            write!(f, "{:.2} {}", size, scale)
        }
    }
}
