use std::io;

use thiserror::Error;
use tracing::warn;

use crate::sink::OutputSink;

/// Failures that degrade the sideload but never stop it. The display text is
/// what the operator sees on the console.
#[derive(Debug, Error)]
pub enum SideloadError {
    #[error("failed to open driver control: {}", os_error_text(.0))]
    DriverOpen(#[source] io::Error),
    #[error("failed to set driver control: {}", os_error_text(.0))]
    DriverWrite(#[source] io::Error),
    #[error("failed to close driver control: {}", os_error_text(.0))]
    DriverClose(#[source] io::Error),
    #[error("failed to read property {key}: {source}")]
    PropertyGet {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to set property {key}={value}: {source}")]
    PropertySet {
        key: String,
        value: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// The bare `strerror` text for OS errors, without std's ` (os error N)`
/// suffix. Other errors display as usual.
pub(crate) fn os_error_text(err: &io::Error) -> String {
    let text = err.to_string();
    match err.raw_os_error() {
        Some(code) => text
            .strip_suffix(&format!(" (os error {code})"))
            .map(str::to_string)
            .unwrap_or(text),
        None => text,
    }
}

/// Runs the report side of a best-effort step: an error is printed on the
/// sink and logged, then dropped.
pub fn best_effort<T>(sink: &mut dyn OutputSink, result: Result<T, SideloadError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{err}");
            sink.print(&format!("{err}\n"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Lines(Vec<String>);

    impl OutputSink for Lines {
        fn print(&mut self, text: &str) {
            self.0.push(text.to_string());
        }
    }

    #[test]
    fn ok_passes_through_silently() {
        let mut sink = Lines::default();
        assert_eq!(best_effort(&mut sink, Ok(7)), Some(7));
        assert!(sink.0.is_empty());
    }

    #[test]
    fn err_is_printed_and_swallowed() {
        let mut sink = Lines::default();
        let err = io::Error::from_raw_os_error(libc::EACCES);
        let result: Result<(), _> = Err(SideloadError::DriverOpen(err));

        assert_eq!(best_effort(&mut sink, result), None);
        assert_eq!(sink.0.len(), 1);
        assert!(sink.0[0].starts_with("failed to open driver control: "));
        assert!(sink.0[0].ends_with('\n'));
    }

    #[test]
    fn driver_errors_show_bare_strerror() {
        let err = SideloadError::DriverWrite(io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(
            err.to_string(),
            "failed to set driver control: No such file or directory"
        );
    }

    #[test]
    fn non_os_errors_keep_their_text() {
        let err = io::Error::other("setprop exited with 1");
        assert_eq!(os_error_text(&err), "setprop exited with 1");
        assert_eq!(
            os_error_text(&io::Error::from_raw_os_error(libc::ENOTDIR)),
            "Not a directory"
        );
    }

    #[test]
    fn property_errors_name_the_key() {
        let err = SideloadError::PropertySet {
            key: "ctl.stop".into(),
            value: "adbd".into(),
            source: io::Error::other("setprop exited with 1"),
        };
        assert_eq!(
            err.to_string(),
            "failed to set property ctl.stop=adbd: setprop exited with 1"
        );
    }
}
