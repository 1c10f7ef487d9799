//! Function-call bridge: model-requested mutations of the application state.
//!
//! Every recognised call produces exactly one acknowledgement, including when
//! its arguments are malformed or the store rejects the mutation. Unknown call
//! names produce nothing.

use crate::defaults;
use crate::error::{EvaError, Result};
use crate::live::protocol::{FunctionCall, FunctionResponse};
use crate::store::CareStore;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Alert kind used when `alertFamily` does not name one.
const DEFAULT_FAMILY_ALERT_KIND: &str = "ALERTA_FAMILIA";

#[derive(Debug, Deserialize)]
struct RegisterClientArgs {
    name: String,
    phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertFamilyArgs {
    description: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    client_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmMedicationArgs {
    client_name: String,
    medication: String,
}

/// The calls this bridge knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownCall {
    RegisterClient,
    AlertFamily,
    ConfirmMedication,
}

impl KnownCall {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            n if n == defaults::REGISTER_CLIENT_FN => Some(KnownCall::RegisterClient),
            n if n == defaults::ALERT_FAMILY_FN => Some(KnownCall::AlertFamily),
            n if n == defaults::CONFIRM_MEDICATION_FN => Some(KnownCall::ConfirmMedication),
            _ => None,
        }
    }
}

pub struct FunctionBridge {
    store: Arc<dyn CareStore>,
}

impl FunctionBridge {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    /// Execute `call` and build its acknowledgement.
    ///
    /// Returns `None` for unknown call names.
    pub fn handle(&self, call: &FunctionCall) -> Option<FunctionResponse> {
        let Some(kind) = KnownCall::from_name(&call.name) else {
            let ignored = EvaError::UnknownFunctionCall {
                name: call.name.clone(),
            };
            tracing::debug!("{}", ignored);
            return None;
        };

        let content = match self.execute(kind, call) {
            Ok(message) => {
                tracing::info!(name = %call.name, "function call executed");
                message
            }
            Err(e) => {
                tracing::warn!(name = %call.name, "function call failed: {}", e);
                format!("ERRO: {}", e)
            }
        };
        Some(FunctionResponse::ack(call, content))
    }

    fn execute(&self, kind: KnownCall, call: &FunctionCall) -> Result<String> {
        match kind {
            KnownCall::RegisterClient => {
                let args: RegisterClientArgs = parse_args(call)?;
                if args.name.trim().is_empty() || args.phone.trim().is_empty() {
                    return Err(EvaError::Protocol {
                        message: "nome e telefone são obrigatórios".to_string(),
                    });
                }
                let client = self.store.insert_client(&args.name, &args.phone)?;
                Ok(format!("OK: Idoso {} cadastrado com sucesso.", client.name))
            }
            KnownCall::AlertFamily => {
                let args: AlertFamilyArgs = parse_args(call)?;
                let kind = args
                    .kind
                    .as_deref()
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .unwrap_or(DEFAULT_FAMILY_ALERT_KIND);
                self.store
                    .push_alert(kind, &args.description, args.client_name.as_deref())?;
                Ok("OK: Família avisada.".to_string())
            }
            KnownCall::ConfirmMedication => {
                let args: ConfirmMedicationArgs = parse_args(call)?;
                if args.client_name.trim().is_empty() || args.medication.trim().is_empty() {
                    return Err(EvaError::Protocol {
                        message: "nome do idoso e medicamento são obrigatórios".to_string(),
                    });
                }
                match self
                    .store
                    .confirm_medication(&args.client_name, &args.medication)?
                {
                    Some(appointment) => Ok(format!(
                        "OK: {} de {} confirmado.",
                        appointment.description, appointment.client_name
                    )),
                    None => Ok(format!(
                        "Nenhum agendamento pendente de {} para {}.",
                        args.medication, args.client_name
                    )),
                }
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(call: &FunctionCall) -> Result<T> {
    serde_json::from_value(call.args.clone()).map_err(|e| EvaError::Protocol {
        message: format!("argumentos inválidos para {}: {}", call.name, e),
    })
}
