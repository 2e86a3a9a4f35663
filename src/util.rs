/// Records the elapsed time to a histogram metric when dropped.
pub struct ScopedTimer {
    name: &'static str,
    start: std::time::Instant,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        metrics::histogram!(self.name, self.start.elapsed().as_secs_f64());
    }
}

pub fn framenumber_to_hhmmss(framenumber: u32, fps: f64) -> String {
    let duration = std::time::Duration::from_secs_f64(framenumber as f64 / fps);
    let seconds = duration.as_secs() % 60;
    let minutes = (duration.as_secs() / 60) % 60;
    let hours = (duration.as_secs() / 60) / 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[macro_export]
macro_rules! log_error {
    ( $x:expr ) => {
        match $x {
            Ok(_) => {}
            Err(e) => {
                log::error!("{}", e);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmmss_formatting() {
        assert_eq!(framenumber_to_hhmmss(0, 25.0), "00:00:00");
        assert_eq!(framenumber_to_hhmmss(25, 25.0), "00:00:01");
        assert_eq!(framenumber_to_hhmmss(25 * 3600 + 25 * 61, 25.0), "01:01:01");
    }
}
