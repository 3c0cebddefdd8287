use std::{io, path::Path, time::Duration};

use tokio::{
    net::windows::named_pipe::{ClientOptions, NamedPipeClient},
    time::{sleep, Instant},
};

/// `ERROR_PIPE_BUSY`: every instance of the pipe is taken.
const ERROR_PIPE_BUSY: i32 = 231;

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Opens the pipe, retrying while the server has no free instance.
pub(super) async fn connect(path: &Path, timeout: Duration) -> io::Result<NamedPipeClient> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match ClientOptions::new().open(path) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                let retry_at = Instant::now().checked_add(BUSY_RETRY_DELAY);
                if matches!((retry_at, deadline), (Some(at), Some(deadline)) if at >= deadline) {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("named pipe {} stayed busy", path.display()),
                    ));
                }
                trace!("named pipe {} busy, retrying", path.display());
            }
            Err(e) => return Err(e),
        }
        sleep(BUSY_RETRY_DELAY).await;
    }
}
