use std::{io, path::Path};

use tokio::net::UnixStream;

pub(super) async fn connect(path: &Path) -> io::Result<UnixStream> {
    UnixStream::connect(path).await.map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("unix socket {}: {}", path.display(), e),
        )
    })
}
