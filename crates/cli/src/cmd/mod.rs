mod base;
mod build;
mod gc;
mod images;
mod info;
mod inspect;
mod ps;
mod run;

pub use base::{cmd_base_add, cmd_base_list};
pub use build::cmd_build;
pub use gc::cmd_gc;
pub use images::{cmd_images, cmd_untag};
pub use info::cmd_info;
pub use inspect::cmd_inspect;
pub use ps::cmd_ps;
pub use run::cmd_run;

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub(crate) async fn ctrl_c() {
  if tokio::signal::ctrl_c().await.is_err() {
    std::future::pending::<()>().await;
  }
}
