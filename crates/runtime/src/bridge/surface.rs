use std::future::Future;

/// Host-side effects a rendered UI can request.
///
/// The bridge decides *when* these happen; implementations decide *how*
/// they reach the page hosting the rendering context.
pub trait HostSurface: Send + Sync + 'static {
    /// Ask the user whether `url` may be opened. `false` means declined.
    fn confirm_open_link(
        &self,
        session_id: &str,
        url: &str,
    ) -> impl Future<Output = bool> + Send;

    /// Open a link the user already confirmed.
    fn open_link(&self, session_id: &str, url: &str);

    /// Set the visible height of the rendering context, in pixels.
    fn resize(&self, session_id: &str, height: u32);
}
