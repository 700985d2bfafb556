//! Database service control with an ordered fallback ladder.
//!
//! Stop/start is attempted through a sequence of strategies — native service
//! manager, generic service command, container runtime — and the first one
//! that succeeds wins. Exhausting the ladder is its own error kind.

use std::process::Command;
use tracing::{info, warn};

use crate::invoke::run_checked;
use crate::utils::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Stop,
    Start,
}

impl ServiceAction {
    fn verb(self) -> &'static str {
        match self {
            ServiceAction::Stop => "stop",
            ServiceAction::Start => "start",
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb())
    }
}

/// One rung of the ladder.
pub trait ServiceStrategy {
    fn label(&self) -> &str;
    fn run(&self, action: ServiceAction, service: &str) -> Result<()>;
}

/// Argument order differs per tool: `systemctl stop mysql`,
/// `service mysql stop`, `docker stop mysql`.
enum ArgOrder {
    ActionThenService,
    ServiceThenAction,
}

struct HostCommand {
    tool: &'static str,
    order: ArgOrder,
}

impl ServiceStrategy for HostCommand {
    fn label(&self) -> &str {
        self.tool
    }

    fn run(&self, action: ServiceAction, service: &str) -> Result<()> {
        let mut cmd = Command::new(self.tool);
        match self.order {
            ArgOrder::ActionThenService => cmd.arg(action.verb()).arg(service),
            ArgOrder::ServiceThenAction => cmd.arg(service).arg(action.verb()),
        };
        run_checked(self.tool, &mut cmd)?;
        Ok(())
    }
}

/// Stops and starts the database service via the fallback ladder.
pub struct ServiceController {
    service: String,
    strategies: Vec<Box<dyn ServiceStrategy>>,
}

impl ServiceController {
    /// The production ladder: systemctl, then service, then docker.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_strategies(
            service,
            vec![
                Box::new(HostCommand {
                    tool: "systemctl",
                    order: ArgOrder::ActionThenService,
                }),
                Box::new(HostCommand {
                    tool: "service",
                    order: ArgOrder::ServiceThenAction,
                }),
                Box::new(HostCommand {
                    tool: "docker",
                    order: ArgOrder::ActionThenService,
                }),
            ],
        )
    }

    pub fn with_strategies(
        service: impl Into<String>,
        strategies: Vec<Box<dyn ServiceStrategy>>,
    ) -> Self {
        Self {
            service: service.into(),
            strategies,
        }
    }

    pub fn stop(&self) -> Result<()> {
        self.attempt(ServiceAction::Stop)
    }

    pub fn start(&self) -> Result<()> {
        self.attempt(ServiceAction::Start)
    }

    fn attempt(&self, action: ServiceAction) -> Result<()> {
        for strategy in &self.strategies {
            match strategy.run(action, &self.service) {
                Ok(()) => {
                    info!(
                        service = %self.service,
                        strategy = strategy.label(),
                        %action,
                        "Service control succeeded"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        service = %self.service,
                        strategy = strategy.label(),
                        %action,
                        error = %e,
                        "Service control strategy failed, trying next"
                    );
                }
            }
        }
        Err(Error::ServiceControlFailure(format!(
            "{action} {}",
            self.service
        )))
    }
}
