//! Secret-verification and module-dispatch pipeline

use crate::envelope::PacketEnvelope;
use crate::module::{Module, TraceKind};
use crate::secrets::SecretResolver;
use radrelay_proto::Code;
use std::sync::Arc;
use tracing::{debug, warn};

/// Authorization verdict for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Success,
    BadSecret,
    PreAuthFailed,
    PostAuthFailed,
}

/// Which side of the backend a packet is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Before the request reaches the backend (secret is verified)
    Pre,
    /// On a backend response (no secret re-verification)
    Post,
}

/// Runs secret verification and the registered module hooks for each
/// packet, producing a [`ReasonCode`].
///
/// Module lists are fixed after startup. Every registered check runs
/// even after one fails so audit and metrics side effects stay
/// consistent; a module failure only upgrades a still-`Success`
/// verdict, and `BadSecret` is never downgraded to a module failure.
pub struct AuthorizationPipeline {
    resolver: SecretResolver,
    modules: Vec<Arc<dyn Module>>,
    pre_checks: Vec<Arc<dyn Module>>,
    post_checks: Vec<Arc<dyn Module>>,
    trace_hook: Option<Arc<dyn Module>>,
    account_hook: Option<Arc<dyn Module>>,
}

impl AuthorizationPipeline {
    pub fn new(resolver: SecretResolver) -> Self {
        AuthorizationPipeline {
            resolver,
            modules: Vec::new(),
            pre_checks: Vec::new(),
            post_checks: Vec::new(),
            trace_hook: None,
            account_hook: None,
        }
    }

    pub fn resolver(&self) -> &SecretResolver {
        &self.resolver
    }

    /// Register a module for every hook its capabilities advertise.
    /// Only one trace hook and one accounting hook are kept; a later
    /// registration replaces the earlier one.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        let caps = module.capabilities();
        if caps.pre {
            self.pre_checks.push(Arc::clone(&module));
        }
        if caps.post {
            self.post_checks.push(Arc::clone(&module));
        }
        if caps.trace {
            if self.trace_hook.is_some() {
                debug!(module = module.name(), "replacing trace hook");
            }
            self.trace_hook = Some(Arc::clone(&module));
        }
        if caps.account {
            if self.account_hook.is_some() {
                debug!(module = module.name(), "replacing accounting hook");
            }
            self.account_hook = Some(Arc::clone(&module));
        }
        self.modules.push(module);
    }

    /// All registered modules, for reload/unload sweeps
    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Authorize a packet for the given mode.
    ///
    /// A missing envelope or an unparseable packet is not a rejection:
    /// mid-negotiation reads routinely fail to parse and are passed
    /// through with a `Success` verdict without running any module.
    pub fn authorize(
        &self,
        envelope: Option<&mut PacketEnvelope>,
        mode: AuthMode,
    ) -> ReasonCode {
        let Some(envelope) = envelope else {
            return ReasonCode::Success;
        };
        let mut verdict = ReasonCode::Success;
        let active = match mode {
            AuthMode::Pre => !self.pre_checks.is_empty(),
            AuthMode::Post => !self.post_checks.is_empty(),
        };
        let tracing_active = self.trace_hook.is_some();
        if !active && !tracing_active && !matches!(mode, AuthMode::Pre) {
            return verdict;
        }
        envelope.ensure_parsed(self.resolver.global_secret());
        if envelope.failed_parse() {
            return verdict;
        }
        if matches!(mode, AuthMode::Pre) {
            // packet() is Some here: parse neither failed nor was skipped
            if let Some(packet) = envelope.packet() {
                if let Err(e) = self.resolver.verify(packet, envelope.sender()) {
                    warn!(error = %e, "invalid radius secret");
                    verdict = ReasonCode::BadSecret;
                }
            }
        }
        let (checks, failure_code) = match mode {
            AuthMode::Pre => (&self.pre_checks, ReasonCode::PreAuthFailed),
            AuthMode::Post => (&self.post_checks, ReasonCode::PostAuthFailed),
        };
        for module in checks {
            let passed = match mode {
                AuthMode::Pre => module.pre(envelope),
                AuthMode::Post => module.post(envelope),
            };
            if passed {
                continue;
            }
            debug!(module = module.name(), "unauthorized (module check failed)");
            if verdict == ReasonCode::Success {
                verdict = failure_code;
            }
        }
        if let Some(trace) = &self.trace_hook {
            trace.trace(TraceKind::Request, envelope);
        }
        verdict
    }

    /// Run the accounting hook for a packet. Accounting never produces
    /// a verdict; unparseable packets are dropped silently.
    pub fn account(&self, envelope: &mut PacketEnvelope) {
        let Some(account) = &self.account_hook else {
            return;
        };
        envelope.ensure_parsed(self.resolver.global_secret());
        if envelope.failed_parse() {
            return;
        }
        account.account(envelope);
    }

    /// Build the signed Access-Reject bytes for a rejected request.
    ///
    /// Never called for `BadSecret` verdicts (a reject would leak a
    /// valid-looking response to a sender that does not know the
    /// secret); returns None when the packet never parsed.
    pub fn reject_for(&self, envelope: &PacketEnvelope) -> Option<Vec<u8>> {
        let packet = envelope.packet()?;
        let reject = packet.response(Code::AccessReject);
        match reject.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "unable to encode rejection");
                None
            }
        }
    }

    /// Invoke every module's reload hook exactly once
    pub fn reload(&self) {
        for module in &self.modules {
            debug!(module = module.name(), "reloading module");
            module.reload();
        }
    }

    /// Invoke every module's unload hook exactly once
    pub fn unload(&self) {
        for module in &self.modules {
            debug!(module = module.name(), "unloading module");
            module.unload();
        }
    }
}
