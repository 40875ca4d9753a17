//! Terminal labels, one row per session language.

#[derive(Debug)]
pub struct UiText {
    pub you: &'static str,
    pub assistant: &'static str,
    pub sources: &'static str,
    pub related: &'static str,
    pub cleared: &'static str,
    pub saved_to: &'static str,
    pub loaded_from: &'static str,
    pub config_updated: &'static str,
    pub interrupted: &'static str,
    pub error: &'static str,
    pub turn_kept: &'static str,
    pub goodbye: &'static str,
}

static UI_TEXT: &[(&str, UiText)] = &[
    (
        "pt-br",
        UiText {
            you: "Você",
            assistant: "Assistente",
            sources: "Fontes",
            related: "Perguntas relacionadas",
            cleared: "Histórico limpo.",
            saved_to: "Conversa salva em",
            loaded_from: "Conversa carregada de",
            config_updated: "Configuração atualizada",
            interrupted: "[interrompido]",
            error: "Erro",
            turn_kept: "Sua mensagem continua no histórico, sem resposta.",
            goodbye: "Até logo!",
        },
    ),
    (
        "en",
        UiText {
            you: "You",
            assistant: "Assistant",
            sources: "Sources",
            related: "Related questions",
            cleared: "History cleared.",
            saved_to: "Conversation saved to",
            loaded_from: "Conversation loaded from",
            config_updated: "Config updated",
            interrupted: "[interrupted]",
            error: "Error",
            turn_kept: "Your message stays in the history without a reply.",
            goodbye: "Goodbye!",
        },
    ),
];

/// Labels for `language`, falling back to the first row.
pub fn ui_text(language: &str) -> &'static UiText {
    UI_TEXT
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(language))
        .map_or(&UI_TEXT[0].1, |(_, text)| text)
}
