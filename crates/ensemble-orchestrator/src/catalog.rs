//! The specialist catalog: who can be invoked and which topics they own.

use crate::config::ConfigError;
use ensemble_types::{CredentialGroup, SpecialistProfile};
use ensemble_voice::{avatar_identity_for, IdentityDirectory};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// An ordered, read-only set of specialist profiles.
///
/// Order matters: topic routing returns the first profile, in catalog
/// order, whose keywords match.
#[derive(Debug, Clone)]
pub struct SpecialistCatalog {
    profiles: Vec<Arc<SpecialistProfile>>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    specialists: Vec<SpecialistProfile>,
}

impl SpecialistCatalog {
    /// Builds a catalog, rejecting empty or duplicate identifiers.
    pub fn new(profiles: Vec<SpecialistProfile>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            let id = profile.id.trim();
            if id.is_empty() {
                return Err(ConfigError::Invalid(
                    "specialist id must not be empty".to_string(),
                ));
            }
            if !seen.insert(id.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate specialist id '{id}'"
                )));
            }
        }
        Ok(Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parses a TOML document with a `[[specialists]]` array.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile = toml::from_str(contents)?;
        Self::new(file.specialists)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// The four built-in mentoring specialists.
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles().into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SpecialistProfile>> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SpecialistProfile>> {
        self.profiles.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// First specialist whose keywords occur in `topic`, ignoring case.
    pub fn route_topic(&self, topic: &str) -> Option<&Arc<SpecialistProfile>> {
        let topic_lower = topic.to_lowercase();
        self.profiles.iter().find(|p| p.matches_topic(&topic_lower))
    }

    /// `(id, "Name - Role")` for every specialist, in catalog order.
    pub fn roster(&self) -> Vec<(String, String)> {
        self.profiles
            .iter()
            .map(|p| (p.id.clone(), p.summary()))
            .collect()
    }

    /// The roster as prompt lines: `- {id}: {name} - {role}`.
    pub fn roster_prompt(&self) -> String {
        self.roster()
            .into_iter()
            .map(|(id, summary)| format!("- {id}: {summary}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every room identity that belongs to an agent.
    ///
    /// Specialists are known by id and display name; every agent (the
    /// primary included) also by its avatar's identity. `auxiliary`
    /// identities count as specialists.
    pub fn identity_directory(
        &self,
        primary_identity: &str,
        auxiliary: &[String],
    ) -> IdentityDirectory {
        let mut directory = IdentityDirectory::new(primary_identity);
        directory.register_alias(
            &avatar_identity_for(&primary_identity.to_lowercase()),
            primary_identity,
        );
        for profile in &self.profiles {
            let canonical = profile.id.to_lowercase();
            directory.register_agent(&canonical);
            for alias in profile.identities() {
                directory.register_alias(&alias, &canonical);
            }
            directory.register_alias(&avatar_identity_for(&canonical), &canonical);
        }
        for identity in auxiliary {
            directory.register_agent(identity);
        }
        directory
    }
}

impl Default for SpecialistCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn builtin_profiles() -> Vec<SpecialistProfile> {
    vec![
        SpecialistProfile {
            id: "marketing".to_string(),
            name: "Maya".to_string(),
            role: "Especialista em Marketing e Crescimento".to_string(),
            avatar_id: "694c83e2-8895-4a98-bd16-56332ca3f449".to_string(),
            voice: "Aoede".to_string(),
            instructions: MARKETING_INSTRUCTIONS.trim().to_string(),
            expertise_keywords: keywords(&[
                "marketing",
                "tráfego",
                "vendas",
                "leads",
                "funil",
                "conversão",
                "anúncios",
                "redes sociais",
                "instagram",
                "facebook",
                "google ads",
            ]),
            credential_group: CredentialGroup::Primary,
        },
        SpecialistProfile {
            id: "finance".to_string(),
            name: "Ricardo".to_string(),
            role: "Especialista em Finanças Empresariais".to_string(),
            avatar_id: "b63ba4e6-d346-45d0-ad28-5ddffaac0bd0_v2".to_string(),
            voice: "Charon".to_string(),
            instructions: FINANCE_INSTRUCTIONS.trim().to_string(),
            expertise_keywords: keywords(&[
                "financeiro",
                "fluxo de caixa",
                "investimento",
                "lucro",
                "margem",
                "custo",
                "preço",
                "precificação",
                "dre",
                "balanço",
                "capital",
                "empréstimo",
            ]),
            credential_group: CredentialGroup::Secondary,
        },
        SpecialistProfile {
            id: "product".to_string(),
            name: "Lucas".to_string(),
            role: "Especialista em Produto e Inovação".to_string(),
            avatar_id: "7124071d-480e-4fdc-ad0e-a2e0680f1378".to_string(),
            voice: "Fenrir".to_string(),
            instructions: PRODUCT_INSTRUCTIONS.trim().to_string(),
            expertise_keywords: keywords(&[
                "produto",
                "mvp",
                "startup",
                "inovação",
                "tecnologia",
                "app",
                "software",
                "desenvolvimento",
                "roadmap",
                "funcionalidades",
                "usuário",
            ]),
            credential_group: CredentialGroup::Primary,
        },
        SpecialistProfile {
            id: "legal".to_string(),
            name: "Fernanda".to_string(),
            role: "Especialista em Aspectos Legais e Contratos".to_string(),
            avatar_id: "2bc759ab-a7e5-4b91-941d-9e42450d6546".to_string(),
            voice: "Kore".to_string(),
            instructions: LEGAL_INSTRUCTIONS.trim().to_string(),
            expertise_keywords: keywords(&[
                "contrato",
                "sócio",
                "sociedade",
                "juridico",
                "legal",
                "clt",
                "funcionário",
                "trabalhista",
                "marca",
                "patente",
                "lgpd",
            ]),
            credential_group: CredentialGroup::Secondary,
        },
    ]
}

const MARKETING_INSTRUCTIONS: &str = r#"
Você é **Maya**, especialista em Marketing Digital e Growth Hacking. Você trabalha junto com Cosmo na equipe de mentoria.

## Sua Personalidade:
- Enérgica e criativa
- Orientada a dados e resultados
- Sempre com exemplos práticos de campanhas

## Suas Especialidades:
- Tráfego pago (Google Ads, Meta Ads, TikTok Ads)
- Funil de vendas e conversão
- Copywriting persuasivo
- Estratégias de crescimento orgânico
- Marketing de conteúdo

## Regras:
- Responda SEMPRE em Português Brasileiro
- Seja concisa (máximo 3-4 frases por resposta)
- Quando possível, dê exemplos com números e métricas
- Interaja naturalmente com Cosmo se ele estiver na conversa
"#;

const FINANCE_INSTRUCTIONS: &str = r#"
Você é **Ricardo**, especialista em Finanças Empresariais e Investimentos. Você faz parte da equipe de mentoria liderada por Cosmo.

## Sua Personalidade:
- Analítico e metódico
- Conservador com riscos, mas aberto a oportunidades calculadas
- Explica conceitos financeiros de forma simples

## Suas Especialidades:
- Fluxo de caixa e gestão financeira
- Precificação estratégica
- Análise de DRE e balanços
- Captação de investimentos e empréstimos
- Planejamento tributário básico

## Regras:
- Responda SEMPRE em Português Brasileiro
- Seja conciso (máximo 3-4 frases por resposta)
- Use exemplos numéricos quando possível
- Peça dados específicos se precisar para dar um conselho mais assertivo
"#;

const PRODUCT_INSTRUCTIONS: &str = r#"
Você é **Lucas**, especialista em Produto, Startups e Inovação. Você colabora com Cosmo para ajudar empreendedores.

## Sua Personalidade:
- Apaixonado por tecnologia e inovação
- Focado em resolver problemas do usuário
- Adora metodologias ágeis e MVP

## Suas Especialidades:
- Desenvolvimento de MVP
- Product-Market Fit
- Metodologias ágeis (Scrum, Kanban)
- UX e experiência do usuário
- Roadmap de produto

## Regras:
- Responda SEMPRE em Português Brasileiro
- Seja conciso (máximo 3-4 frases por resposta)
- Sempre pergunte qual problema o usuário quer resolver
- Sugira testes e validações rápidas
"#;

const LEGAL_INSTRUCTIONS: &str = r#"
Você é **Fernanda**, especialista em aspectos legais e contratuais para empresas. Você faz parte da equipe de mentoria de Cosmo.

## Sua Personalidade:
- Cautelosa e detalhista
- Explica termos jurídicos de forma acessível
- Sempre recomenda consultar um advogado para casos específicos

## Suas Especialidades:
- Contratos comerciais e de prestação de serviços
- Sociedades e acordo de sócios
- Aspectos trabalhistas básicos
- LGPD e proteção de dados
- Registro de marcas

## Regras:
- Responda SEMPRE em Português Brasileiro
- Seja concisa (máximo 3-4 frases por resposta)
- Dê orientações gerais, mas sempre recomende consulta profissional para casos específicos
- Alerte sobre riscos comuns que empreendedores ignoram
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_types::{ParticipantKind, ParticipantRole};

    #[test]
    fn builtin_catalog_shape() {
        let catalog = SpecialistCatalog::builtin();
        assert_eq!(catalog.ids(), vec!["marketing", "finance", "product", "legal"]);
        let voices: Vec<&str> = catalog.iter().map(|p| p.voice.as_str()).collect();
        assert_eq!(voices, vec!["Aoede", "Charon", "Fenrir", "Kore"]);
        let groups: Vec<CredentialGroup> = catalog.iter().map(|p| p.credential_group).collect();
        assert_eq!(
            groups,
            vec![
                CredentialGroup::Primary,
                CredentialGroup::Secondary,
                CredentialGroup::Primary,
                CredentialGroup::Secondary
            ]
        );
    }

    #[test]
    fn routes_topics_in_catalog_order() {
        let catalog = SpecialistCatalog::builtin();
        let routed = catalog.route_topic("Preciso entender meu FLUXO DE CAIXA");
        assert_eq!(routed.map(|p| p.id.as_str()), Some("finance"));
        assert!(catalog.route_topic("como vai o tempo hoje?").is_none());
        // "vendas" (marketing) and "preço" (finance) both match; marketing is first.
        let routed = catalog.route_topic("vendas caíram depois do novo preço");
        assert_eq!(routed.map(|p| p.id.as_str()), Some("marketing"));
    }

    #[test]
    fn roster_prompt_lines() {
        let catalog = SpecialistCatalog::builtin();
        let prompt = catalog.roster_prompt();
        assert!(prompt.starts_with("- marketing: Maya - Especialista em Marketing e Crescimento"));
        assert_eq!(prompt.lines().count(), 4);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let toml = r#"
[[specialists]]
id = "ops"
name = "Ana"
role = "Operações"
avatar_id = "a"
voice = "Kore"
instructions = "..."

[[specialists]]
id = "OPS"
name = "Bia"
role = "Operações"
avatar_id = "b"
voice = "Puck"
instructions = "..."
"#;
        let err = SpecialistCatalog::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn loads_catalog_file() {
        let toml = r#"
[[specialists]]
id = "ops"
name = "Ana"
role = "Especialista em Operações"
avatar_id = "a"
voice = "Kore"
instructions = "Você é Ana."
expertise_keywords = ["estoque", "logística"]
credential_group = "secondary"
"#;
        let catalog = SpecialistCatalog::from_toml_str(toml).expect("catalog parses");
        assert_eq!(catalog.len(), 1);
        let ops = catalog.get("ops").expect("ops present");
        assert_eq!(ops.credential_group, CredentialGroup::Secondary);
        assert_eq!(
            catalog.route_topic("problema de logística").map(|p| p.id.as_str()),
            Some("ops")
        );
    }

    #[test]
    fn directory_knows_every_agent_identity() {
        let catalog = SpecialistCatalog::builtin();
        let directory = catalog.identity_directory("cosmo", &["bey-avatar-agent".to_string()]);

        let classify = |id: &str| directory.classify(id, ParticipantKind::Standard);
        assert_eq!(classify("cosmo-avatar").role, ParticipantRole::PrimaryAgent);
        assert_eq!(classify("Ricardo").identity, "finance");
        assert_eq!(classify("legal-avatar").identity, "legal");
        assert_eq!(classify("bey-avatar-agent").role, ParticipantRole::SpecialistAgent);
        assert_eq!(classify("alice").role, ParticipantRole::StandardParticipant);
    }
}
