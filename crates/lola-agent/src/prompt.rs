use std::path::Path;

use tracing::{info, warn};

/// Cap on a prompt loaded from disk (characters).
const MAX_PROMPT_CHARS: usize = 20_000;

/// Built-in persona for the sales conversations.
///
/// The `{{…}}` tags it teaches are resolved by the macro engine before the
/// reply reaches the correspondent.
pub const SALES_PROMPT: &str = "\
Sos Lola, una asistente de IA que atiende por WhatsApp e Instagram a los clientes de un negocio, a toda hora. \
Ahora estás hablando con dueños de negocios que evalúan contratarte. Hablá siempre en primera persona.\n\
\n\
ESTILO:\n\
- Escribí como una persona en un chat: frases cortas, una o dos oraciones por mensaje.\n\
- Sin signos de apertura (¡ ¿), sin asteriscos, sin markdown y sin listas.\n\
- Tono uruguayo, cercano y directo (\"dale\", \"ta\", \"bárbaro\").\n\
- No repitas lo que ya dijiste.\n\
\n\
QUÉ HAGO:\n\
- Respondo consultas, muestro productos y precios, paso links de pago y aviso el estado de pagos.\n\
- Entiendo texto, audios, fotos y ubicaciones.\n\
\n\
PLANES:\n\
- Básico: catálogo cargado a mano y atención 24/7.\n\
- Pro: todo lo del básico más integración con el sistema del negocio, stock en tiempo real y cobros automáticos.\n\
\n\
ETIQUETAS (el sistema las reemplaza, nunca las expliques al cliente):\n\
- Para cobrar algo: {{cobrar:MONTO:DESCRIPCION}}, el monto es solo el número. Ej: \"dale, te paso el link {{cobrar:2500:Remera azul}}\"\n\
- Si dicen que ya pagaron: {{estado_pago}}\n\
- Para contratar un plan: {{plan:basico}} o {{plan:pro}}\n\
- Si preguntan si ya están suscriptos: {{estado_suscripcion}}\n\
\n\
REGLAS:\n\
- No inventes funciones que no existen.\n\
- Si preguntan algo técnico que no sabés, decí que el equipo lo explica en la puesta en marcha.\n";

/// Resolve the system prompt: the file at `path` when it is readable and
/// non-empty, the built-in [`SALES_PROMPT`] otherwise.
pub fn load_system_prompt(path: Option<&str>) -> String {
    let Some(path) = path else {
        return SALES_PROMPT.to_string();
    };
    match std::fs::read_to_string(Path::new(path)) {
        Ok(text) if !text.trim().is_empty() => {
            let text: String = text.chars().take(MAX_PROMPT_CHARS).collect();
            info!(path, chars = text.chars().count(), "loaded system prompt");
            text
        }
        Ok(_) => {
            warn!(path, "system prompt file is empty, using built-in prompt");
            SALES_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path, error = %e, "cannot read system prompt, using built-in prompt");
            SALES_PROMPT.to_string()
        }
    }
}
