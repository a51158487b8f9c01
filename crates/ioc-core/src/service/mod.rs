//! Service layer: the Conles bus, its dispatcher thread, the link lifecycle
//! manager and the runtime facade.

pub mod conles;
pub mod dispatcher;
pub mod lifecycle;
pub mod runtime;

pub use conles::{BusStats, ConlesEventBus};
pub use dispatcher::DispatcherHandle;
pub use lifecycle::{LinkLifecycleManager, LinkOrigin};
pub use runtime::IocRuntime;
