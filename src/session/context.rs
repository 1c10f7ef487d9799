//! Opening instruction and tool declarations for a session.
//!
//! The context snapshot is read once per open and baked into the instruction
//! text; it is not refreshed mid-session.

use crate::config::LiveConfig;
use crate::defaults;
use crate::live::protocol::{FunctionDeclaration, LiveSetup};
use crate::store::ContextSnapshot;
use serde_json::json;
use std::fmt::Write;

/// Text turn sent right after the handshake so the assistant speaks first.
pub const GREETING_PROMPT: &str =
    "Cumprimente o cuidador brevemente e pergunte como pode ajudar hoje.";

const PERSONA: &str = "Você é a EVA, assistente de voz de uma central de cuidado de idosos. \
Fale português do Brasil, com frases curtas, calmas e acolhedoras. \
Use as funções disponíveis quando o cuidador pedir para cadastrar um idoso, \
confirmar um medicamento ou avisar a família. \
Se alguém relatar mal-estar, dor ou pedir socorro, avise a família imediatamente.";

/// Builds the system instruction from the snapshot.
pub fn system_instruction(snapshot: &ContextSnapshot) -> String {
    let mut text = String::from(PERSONA);

    text.push_str("\n\nIdosos cadastrados:");
    if snapshot.clients.is_empty() {
        text.push_str(" nenhum.");
    }
    for client in &snapshot.clients {
        write!(
            text,
            "\n- {} (telefone {}, {} agendamentos pendentes)",
            client.name, client.phone, client.pending_appointments
        ).ok();
    }

    text.push_str("\n\nAlertas ativos:");
    if snapshot.alerts.is_empty() {
        text.push_str(" nenhum.");
    }
    for alert in &snapshot.alerts {
        write!(text, "\n- [{}] {}", alert.kind, alert.description).ok();
        if let Some(client) = &alert.client {
            write!(text, " ({})", client).ok();
        }
    }

    text.push_str("\n\nAgendamentos pendentes:");
    let mut any_pending = false;
    for appointment in snapshot.pending_appointments() {
        any_pending = true;
        write!(
            text,
            "\n- {} às {}: {}",
            appointment.client_name, appointment.time, appointment.description
        ).ok();
    }
    if !any_pending {
        text.push_str(" nenhum.");
    }

    text
}

/// Functions the model may call during a session.
pub fn function_declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: defaults::REGISTER_CLIENT_FN.to_string(),
            description: "Cadastra um novo idoso na central.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "name": {"type": "STRING", "description": "Nome completo do idoso"},
                    "phone": {"type": "STRING", "description": "Telefone com DDD"}
                },
                "required": ["name", "phone"]
            }),
        },
        FunctionDeclaration {
            name: defaults::ALERT_FAMILY_FN.to_string(),
            description: "Envia um alerta urgente para a família do idoso.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "description": {"type": "STRING", "description": "O que aconteceu"},
                    "kind": {"type": "STRING", "description": "Tipo do alerta, por exemplo PASSA_MAL"}
                },
                "required": ["description"]
            }),
        },
        FunctionDeclaration {
            name: defaults::CONFIRM_MEDICATION_FN.to_string(),
            description: "Confirma que o idoso tomou um medicamento agendado.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "clientName": {"type": "STRING", "description": "Nome do idoso"},
                    "medication": {"type": "STRING", "description": "Nome do medicamento"}
                },
                "required": ["clientName", "medication"]
            }),
        },
    ]
}

/// Everything the backend needs to open a session for this snapshot.
pub fn live_setup(config: &LiveConfig, snapshot: &ContextSnapshot) -> LiveSetup {
    LiveSetup {
        model: config.model.clone(),
        voice: config.voice.clone(),
        system_instruction: system_instruction(snapshot),
        functions: function_declarations(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Alert, Appointment, Client};

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            clients: vec![Client {
                id: 1,
                name: "Maria Silva".to_string(),
                phone: "+5511988887777".to_string(),
                pending_appointments: 1,
            }],
            alerts: vec![Alert {
                id: 2,
                kind: "PASSA_MAL".to_string(),
                description: "tontura".to_string(),
                client: Some("Maria Silva".to_string()),
                created_at: 0,
            }],
            appointments: vec![
                Appointment {
                    id: 3,
                    client_name: "Maria Silva".to_string(),
                    description: "Losartana".to_string(),
                    time: "08:00".to_string(),
                    done: false,
                },
                Appointment {
                    id: 4,
                    client_name: "Maria Silva".to_string(),
                    description: "Vitamina D".to_string(),
                    time: "07:00".to_string(),
                    done: true,
                },
            ],
        }
    }

    #[test]
    fn instruction_lists_snapshot_contents() {
        let text = system_instruction(&snapshot());
        assert!(text.starts_with("Você é a EVA"));
        assert!(text.contains("Maria Silva (telefone +5511988887777, 1 agendamentos pendentes)"));
        assert!(text.contains("[PASSA_MAL] tontura (Maria Silva)"));
        assert!(text.contains("Maria Silva às 08:00: Losartana"));
        assert!(!text.contains("Vitamina D"), "done appointments are not pending");
    }

    #[test]
    fn instruction_for_empty_snapshot() {
        let text = system_instruction(&ContextSnapshot::default());
        assert_eq!(text.matches("nenhum.").count(), 3);
    }

    #[test]
    fn declarations_cover_recognised_calls() {
        let names: Vec<_> = function_declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec!["registerClient", "alertFamily", "confirmMedication"]
        );
    }

    #[test]
    fn live_setup_uses_config_model_and_voice() {
        let config = LiveConfig::default();
        let setup = live_setup(&config, &snapshot());
        assert_eq!(setup.model, config.model);
        assert_eq!(setup.voice, "Aoede");
        assert_eq!(setup.functions.len(), 3);
    }
}
