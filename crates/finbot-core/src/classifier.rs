//! Classifier port plus the provider-independent half of classification:
//! the instruction prompt and validation of the structured reply.

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    domain::{Category, ClassifiedRecord, TransactionKind},
    errors::ClassifyError,
};

/// Date format used in prompts, classifier replies and sheet rows.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

pub const SYSTEM_PROMPT: &str = "Você é um assistente útil que retorna JSON.";

/// Turns free text into a [`ClassifiedRecord`].
///
/// One call is one attempt: implementations must not retry.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifiedRecord, ClassifyError>;
}

/// Today's date in the bot's local timezone.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Build the user prompt. `today` anchors relative dates ("hoje",
/// "semana passada") for the model.
pub fn build_prompt(message: &str, today: NaiveDate) -> String {
    let today_s = today.format(DATE_FORMAT).to_string();
    let week_ago_s = today
        .checked_sub_days(Days::new(7))
        .unwrap_or(today)
        .format(DATE_FORMAT)
        .to_string();
    let categories = Category::ALL
        .iter()
        .map(|c| format!("\"{}\"", c.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
Você é um assistente financeiro divertido e organizado.
Analise a mensagem do usuário (que pode ser uma receita ou despesa) e **retorne sempre um JSON válido, bem formatado, sem texto adicional**.

O JSON deve conter os seguintes campos obrigatórios:
* **tipo**: "receita" ou "despesa"
* **valor**: número em reais (sem "R$")
* **descricao**: resumo curto do gasto ou receita
* **data**: formato "dd/mm/aaaa" (se não especificado, usar a data de hoje)
* **categoria**: uma entre [{categories}]
* **retorno**: uma frase divertida e bem jovial, entre 20 e 50 palavras, com emojis, mencionando o tipo de movimentação, o valor, a descrição e a categoria.

O JSON sempre deve estar formatado e pronto para ser lido por um parser! Em hipótese alguma ele deve estar fora do formato padrão de JSON.
### Exemplos:

Mensagem: "Paguei o almoço hoje, foi 25 reais."
JSON:
{{"tipo":"despesa","valor":25,"descricao":"almoço","data":"{today_s}","categoria":"alimentação","retorno":"📉 Você torrou R$25,00 em Alimentação 🍽️. Um rango top que deixou o bolso mais leve 💸, mas valeu a pena pra matar a fome e curtir o momento 😋🔥"}}

Mensagem: "Recebi o pagamento do cliente, 500 reais."
JSON:
{{"tipo":"receita","valor":500,"descricao":"pagamento do cliente","data":"{today_s}","categoria":"outros","retorno":"📈 R$500,00 de Receita chegaram no seu caixa 💼🚀. É aquele up na conta que anima o dia, enche o bolso e dá até vontade de comemorar com um rolê 🎉💰"}}

Mensagem: "Comprei um livro por 50 na semana passada."
JSON:
{{"tipo":"despesa","valor":50,"descricao":"compra de livro","data":"{week_ago_s}","categoria":"lazer","retorno":"📉 Você gastou R$50,00 em Lazer 📚. Investiu numa boa leitura que vai abrir a mente 🤓✨. O bolso chora um pouquinho 💸, mas o cérebro agradece muito 📖🔥"}}

Mensagem do usuário: "{message}"
"#
    )
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    tipo: String,
    valor: serde_json::Value,
    #[serde(default)]
    descricao: String,
    #[serde(default)]
    data: Option<String>,
    categoria: String,
    #[serde(default)]
    retorno: String,
}

/// Validate the model's JSON reply into a record.
///
/// A missing or blank `data` falls back to `today`. Negative amounts are
/// stored as their magnitude; `tipo` carries the direction.
pub fn parse_record(content: &str, today: NaiveDate) -> Result<ClassifiedRecord, ClassifyError> {
    let body = strip_code_fence(content);
    let raw: RawRecord = serde_json::from_str(body)
        .map_err(|e| ClassifyError::MalformedPayload(e.to_string()))?;

    let kind = TransactionKind::from_label(&raw.tipo)
        .ok_or_else(|| ClassifyError::MalformedPayload(format!("unknown tipo: {}", raw.tipo)))?;
    let category = Category::from_label(&raw.categoria).ok_or_else(|| {
        ClassifyError::MalformedPayload(format!("unknown categoria: {}", raw.categoria))
    })?;
    let amount = parse_amount(&raw.valor)?.abs();
    let occurred_on = match raw.data.as_deref().map(str::trim) {
        None | Some("") => today,
        Some(s) => parse_date(s)
            .ok_or_else(|| ClassifyError::MalformedPayload(format!("invalid data: {s}")))?,
    };

    Ok(ClassifiedRecord {
        kind,
        amount,
        description: raw.descricao.trim().to_string(),
        category,
        occurred_on,
        user_facing_summary: raw.retorno.trim().to_string(),
    })
}

fn parse_amount(v: &serde_json::Value) -> Result<Decimal, ClassifyError> {
    let parsed = match v {
        serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok().or_else(|| {
            n.as_f64().and_then(|f| Decimal::try_from(f).ok())
        }),
        // Some models quote the number, occasionally with a decimal comma.
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ClassifyError::MalformedPayload(format!("invalid valor: {v}")))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return t;
    };
    // Drop the language tag on the opening line.
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.trim().contains('{') => body.trim(),
        _ => inner.trim(),
    }
}
