//! Inline directives in generated replies.
//!
//! The model writes markers such as `{{cobrar:2500:Remera}}` or
//! `{{estado_pago}}`; before delivery each one is replaced by the literal
//! result of the action or lookup it names. A recognised marker never
//! reaches the correspondent verbatim, whatever happens to its lookup.

use std::sync::Arc;

use lola_payments::{PaymentProvider, PaymentRecord, SubscriptionRecord};
use tracing::{debug, info, warn};

const POINTER: &str = "👉";

const BAD_AMOUNT: &str = "(error en el monto)";
const NO_PAYMENT_LINK: &str = "(no pude generar el link de pago, probá de nuevo)";
const PAYMENT_LOOKUP_FAILED: &str = "(no pude consultar el estado del pago)";
const NO_PAYMENT_FOUND: &str = "todavia no me aparece ningun pago tuyo, fijate si se completo bien";
const NO_PLAN_LINK: &str = "(link de plan no disponible)";
const SUBSCRIPTION_LOOKUP_FAILED: &str = "(no pude consultar el estado de la suscripcion)";
const NO_SUBSCRIPTION_FOUND: &str = "no me aparece ninguna suscripcion tuya todavia";
const PAYMENTS_UNAVAILABLE: &str = "(sistema de pagos no disponible)";
const DEFAULT_DESCRIPTION: &str = "tu compra";

/// A directive parsed out of generated text.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroDirective {
    /// `{{cobrar:<amount>:<description>}}`: create a one-off checkout link.
    Charge { amount: f64, description: String },
    /// `{{estado_pago}}`: report the latest payment.
    PaymentStatus,
    /// `{{plan:<name>}}`: link to a preconfigured subscription plan.
    Plan { name: String },
    /// `{{estado_suscripcion}}`: report the correspondent's subscription.
    SubscriptionStatus,
}

/// Recognised verb whose arguments did not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Malformed {
    Charge,
    Plan,
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Literal(&'a str),
    Directive(MacroDirective),
    Malformed(Malformed),
}

/// Split `text` into literal runs and directive markers.
///
/// Unknown verbs and unterminated `{{` are left as literal text. When a
/// candidate marker contains another `{{`, scanning restarts at the inner
/// one so `{{ {{plan:pro}}` still yields the plan directive.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut literal_from = 0;
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find("{{") {
        let open = cursor + rel;
        let body_start = open + 2;
        let Some(close_rel) = text[body_start..].find("}}") else {
            break;
        };
        let close = body_start + close_rel;
        let body = &text[body_start..close];

        if let Some(inner) = body.rfind("{{") {
            cursor = body_start + inner;
            continue;
        }

        if let Some(token) = parse_marker(body) {
            if literal_from < open {
                tokens.push(Token::Literal(&text[literal_from..open]));
            }
            tokens.push(token);
            literal_from = close + 2;
        }
        cursor = close + 2;
    }

    if literal_from < text.len() {
        tokens.push(Token::Literal(&text[literal_from..]));
    }
    tokens
}

/// Parse the inside of a `{{…}}` marker. `None` means "not a directive".
fn parse_marker(body: &str) -> Option<Token<'static>> {
    let (verb, args) = match body.split_once(':') {
        Some((verb, args)) => (verb, Some(args)),
        None => (body, None),
    };

    let token = match verb.trim().to_ascii_lowercase().as_str() {
        "cobrar" | "charge" => match args.and_then(parse_charge) {
            Some(directive) => Token::Directive(directive),
            None => Token::Malformed(Malformed::Charge),
        },
        "estado_pago" | "payment_status" => Token::Directive(MacroDirective::PaymentStatus),
        "plan" => match args.map(|a| a.trim().to_lowercase()).filter(|n| !n.is_empty()) {
            Some(name) => Token::Directive(MacroDirective::Plan { name }),
            None => Token::Malformed(Malformed::Plan),
        },
        "estado_suscripcion" | "subscription_status" => {
            Token::Directive(MacroDirective::SubscriptionStatus)
        }
        _ => return None,
    };
    Some(token)
}

/// `<amount>:<description>`; the description may itself contain colons.
fn parse_charge(args: &str) -> Option<MacroDirective> {
    let (amount, description) = args.split_once(':')?;
    let amount: f64 = amount.trim().parse().ok()?;
    let description = description.trim();
    if !amount.is_finite() || amount <= 0.0 || description.is_empty() {
        return None;
    }
    Some(MacroDirective::Charge {
        amount,
        description: description.to_string(),
    })
}

/// Every directive found in `text`, in textual order.
pub fn directives(text: &str) -> Vec<MacroDirective> {
    tokenize(text)
        .into_iter()
        .filter_map(|t| match t {
            Token::Directive(d) => Some(d),
            _ => None,
        })
        .collect()
}

/// Resolves directives against an optional payment backend.
///
/// Without a backend every directive resolves to a fixed "unavailable"
/// phrase. Resolution never fails: provider errors are logged and replaced
/// by user-safe literals.
pub struct MacroEngine {
    payments: Option<Arc<dyn PaymentProvider>>,
}

impl MacroEngine {
    pub fn new(payments: Option<Arc<dyn PaymentProvider>>) -> Self {
        Self { payments }
    }

    /// Replace every directive in `text`, resolving them one at a time in
    /// the order they appear. `payer_ref` is the correspondent address.
    pub async fn expand(&self, text: &str, payer_ref: &str) -> String {
        let tokens = tokenize(text);
        if !tokens.iter().any(|t| !matches!(t, Token::Literal(_))) {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        for token in tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Malformed(Malformed::Charge) => {
                    debug!(payer = %payer_ref, "malformed charge directive");
                    out.push_str(BAD_AMOUNT);
                }
                Token::Malformed(Malformed::Plan) => out.push_str(NO_PLAN_LINK),
                Token::Directive(directive) => {
                    out.push_str(&self.resolve(&directive, payer_ref).await)
                }
            }
        }
        out
    }

    async fn resolve(&self, directive: &MacroDirective, payer_ref: &str) -> String {
        let Some(payments) = &self.payments else {
            debug!(?directive, "payments not configured");
            return PAYMENTS_UNAVAILABLE.to_string();
        };

        match directive {
            MacroDirective::Charge { amount, description } => {
                match payments.create_preference(*amount, description, payer_ref).await {
                    Ok(link) => {
                        info!(payer = %payer_ref, amount, description = %description, "charge link issued");
                        format!("{POINTER} {link}")
                    }
                    Err(e) => {
                        warn!(payer = %payer_ref, amount, error = %e, "charge link failed");
                        NO_PAYMENT_LINK.to_string()
                    }
                }
            }
            MacroDirective::PaymentStatus => match payments.find_latest_payment(payer_ref).await {
                Ok(Some(record)) => payment_phrase(&record),
                Ok(None) => NO_PAYMENT_FOUND.to_string(),
                Err(e) => {
                    warn!(payer = %payer_ref, error = %e, "payment lookup failed");
                    PAYMENT_LOOKUP_FAILED.to_string()
                }
            },
            MacroDirective::Plan { name } => match payments.plan_link(name) {
                Some(link) => format!("{POINTER} {link}"),
                None => {
                    debug!(plan = %name, "no link for plan");
                    NO_PLAN_LINK.to_string()
                }
            },
            MacroDirective::SubscriptionStatus => {
                match payments.find_subscription(payer_ref).await {
                    Ok(Some(record)) => subscription_phrase(&record),
                    Ok(None) => NO_SUBSCRIPTION_FOUND.to_string(),
                    Err(e) => {
                        warn!(payer = %payer_ref, error = %e, "subscription lookup failed");
                        SUBSCRIPTION_LOOKUP_FAILED.to_string()
                    }
                }
            }
        }
    }
}

fn payment_phrase(record: &PaymentRecord) -> String {
    let amount = record.amount;
    let description = match record.description.trim() {
        "" => DEFAULT_DESCRIPTION,
        d => d,
    };
    match record.status.as_str() {
        "approved" => format!("si, ya me llego tu pago de ${amount:.0} por {description}. gracias!"),
        "pending" | "in_process" => format!(
            "tu pago de ${amount:.0} por {description} esta pendiente todavia, dale unos minutos"
        ),
        "rejected" => format!("tu pago de ${amount:.0} fue rechazado, fijate de intentar de nuevo"),
        other => format!("tu pago aparece como '{other}', cualquier cosa escribime"),
    }
}

fn subscription_phrase(record: &SubscriptionRecord) -> String {
    let plan = &record.plan;
    match record.status.as_str() {
        "authorized" => format!("si, ya estas suscripto al plan {plan}, todo en orden"),
        "pending" => format!("tu suscripcion al plan {plan} esta pendiente, fijate si se completo el pago"),
        "cancelled" => format!("tu suscripcion al plan {plan} esta cancelada"),
        other => format!("tu suscripcion al plan {plan} aparece como '{other}'"),
    }
}
