//! The always-present primary agent that leads the conversation.

use crate::agent::{AgentLaunch, AgentSlots, AvatarOutcome, Collaborators, SessionSettings, StopReport};
use crate::config::PrimaryConfig;
use crate::error::OrchestratorError;
use crate::retry::AvatarFailurePolicy;
use ensemble_types::ParticipantRole;
use ensemble_voice::{AgentSessionBinding, IdentityDirectory, SpeechSessionParams};
use std::sync::Arc;
use tracing::{error, info, warn};

const ROSTER_PLACEHOLDER: &str = "{specialists}";
const CONTEXT_PLACEHOLDER: &str = "{context}";

pub const DEFAULT_PRIMARY_INSTRUCTIONS: &str = r#"Você é **Cosmo**, o mentor empresarial líder de uma equipe de especialistas. Sua missão é guiar empreendedores no crescimento de seus negócios.

## Sua Equipe de Especialistas:
Você pode chamar especialistas para ajudar quando o assunto for muito específico:
{specialists}

Para chamar um especialista, diga algo como: "Deixa eu chamar nossa especialista em marketing para te ajudar com isso."

## Sua Personalidade:
- Profissional, mas acessível e empático
- Direto ao ponto, sem rodeios
- Faz perguntas estratégicas para entender o contexto
- Coordena a equipe quando necessário

## Suas Especialidades Gerais:
1. **Gestão Financeira**: Fluxo de caixa, precificação, margem de lucro
2. **Estratégia de Negócios**: Posicionamento, diferenciação, análise de mercado
3. **Liderança e Equipe**: Contratação, delegação, cultura organizacional
4. **Vendas e Marketing**: Funil de vendas, captação de clientes
5. **Produtividade**: Gestão de tempo, processos, automação

## Estrutura da Conversa:
1. Cumprimente brevemente e pergunte qual é o principal desafio
2. Faça 2-3 perguntas de diagnóstico
3. Ofereça insights ou chame um especialista se o tema for muito específico
4. Confirme se o conselho foi útil

## Regras:
- Responda SEMPRE em Português Brasileiro
- Seja conciso (máximo 3-4 frases por resposta)
- Se precisar de um especialista, avise o empresário antes de chamá-lo
- Quando um especialista estiver na sala, coordene a conversa

## Memória:
- Lembre-se do nome do empresário e da empresa
- Anote metas e desafios para acompanhar o progresso
{context}"#;

/// Fills the roster and the context into `template`.
///
/// A missing placeholder means its text is appended instead.
pub fn build_primary_instructions(template: &str, roster: &str, context: &str) -> String {
    let mut instructions = if template.contains(ROSTER_PLACEHOLDER) {
        template.replace(ROSTER_PLACEHOLDER, roster)
    } else if roster.is_empty() {
        template.to_string()
    } else {
        format!("{template}\n\n{roster}")
    };
    if instructions.contains(CONTEXT_PLACEHOLDER) {
        instructions = instructions.replace(CONTEXT_PLACEHOLDER, context);
    } else {
        instructions.push_str(context);
    }
    instructions
}

/// The primary agent's running session.
pub struct PrimaryAgent {
    identity: String,
    collaborators: Collaborators,
    settings: SessionSettings,
    slots: AgentSlots,
    degraded: bool,
}

impl PrimaryAgent {
    pub(crate) async fn start(
        config: &PrimaryConfig,
        instructions: String,
        api_key: &str,
        collaborators: Collaborators,
        directory: Arc<IdentityDirectory>,
        settings: SessionSettings,
    ) -> Result<Self, OrchestratorError> {
        let identity = config.identity.to_lowercase();
        info!(identity = %identity, voice = %config.voice, "starting primary agent");

        let mut agent = Self {
            identity: identity.clone(),
            collaborators,
            settings,
            slots: AgentSlots::default(),
            degraded: false,
        };

        let launch = AgentLaunch {
            identity: identity.clone(),
            role: ParticipantRole::PrimaryAgent,
            track_name: "agent-voice".to_string(),
            params: SpeechSessionParams {
                instructions,
                voice: config.voice.clone(),
                temperature: config.temperature,
                api_key: api_key.to_string(),
                input_transcription: true,
            },
        };
        let binding = match agent.slots.open(launch, &agent.collaborators).await {
            Ok(binding) => binding,
            Err(e) => {
                error!(identity = %identity, error = %e, "failed to start primary speech session");
                agent.stop().await;
                return Err(OrchestratorError::SessionStartFailure {
                    identity,
                    reason: e.to_string(),
                });
            }
        };

        let outcome = agent
            .slots
            .attach_avatar(
                &identity,
                &config.display_name,
                config.avatar_id.as_deref(),
                &agent.collaborators,
                agent.settings.retry,
            )
            .await;
        if let AvatarOutcome::Failed(e) = outcome {
            match agent.settings.avatar_failure {
                AvatarFailurePolicy::Degrade => {
                    warn!(identity = %identity, attempts = e.attempts, error = %e.last_error, "primary avatar unavailable, continuing audio-only");
                    agent.degraded = true;
                }
                AvatarFailurePolicy::Fail => {
                    error!(identity = %identity, attempts = e.attempts, error = %e.last_error, "primary avatar unavailable");
                    agent.stop().await;
                    return Err(OrchestratorError::AvatarAttachFailure {
                        identity,
                        attempts: e.attempts,
                        reason: e.last_error.to_string(),
                    });
                }
            }
        }

        binding.listen(Arc::clone(&agent.collaborators.room), directory);
        info!(identity = %identity, avatar = agent.has_avatar(), "primary agent active");
        Ok(agent)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn binding(&self) -> Option<Arc<AgentSessionBinding>> {
        self.slots.binding()
    }

    pub fn has_avatar(&self) -> bool {
        self.slots.has_avatar()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub async fn speak(&self, text: &str) -> Result<(), OrchestratorError> {
        let binding = self.binding().ok_or(OrchestratorError::PrimaryNotStarted)?;
        binding
            .speak(text)
            .await
            .map_err(|e| OrchestratorError::StreamError {
                identity: self.identity.clone(),
                cause: e.to_string(),
            })
    }

    pub async fn stop(&self) -> StopReport {
        let report = self
            .slots
            .teardown(
                &self.identity,
                self.collaborators.room.as_ref(),
                self.settings.cleanup_timeout,
            )
            .await;
        if !report.is_clean() {
            warn!(identity = %self.identity, failed_steps = ?report.failed_steps, "primary agent stopped with errors");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let out = build_primary_instructions("Equipe:\n{specialists}\n{context}", "- finance: Ricardo", "\n\nctx");
        assert_eq!(out, "Equipe:\n- finance: Ricardo\n\n\nctx");
    }

    #[test]
    fn missing_placeholders_append() {
        let out = build_primary_instructions("Base.", "- legal: Fernanda", "\nctx");
        assert_eq!(out, "Base.\n\n- legal: Fernanda\nctx");
    }

    #[test]
    fn default_template_carries_both_placeholders() {
        assert!(DEFAULT_PRIMARY_INSTRUCTIONS.contains(ROSTER_PLACEHOLDER));
        assert!(DEFAULT_PRIMARY_INSTRUCTIONS.ends_with(CONTEXT_PLACEHOLDER));
    }
}
