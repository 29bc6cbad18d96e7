/// Errors starting an observable area.
#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    #[error("window size {0} is even; the window needs a center chunk")]
    EvenWindow(u32),
    #[error("window size {size} exceeds the maximum of {max} chunks")]
    WindowTooLarge { size: u32, max: u32 },
    #[error("failed to spawn observable area worker: {0}")]
    Spawn(#[from] std::io::Error),
}
