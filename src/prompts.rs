//! Instruction templates sent to the extraction model.
//!
//! Every prompt lives here so a wording change touches exactly one place and
//! unit tests can inspect the text without a model.

use crate::schema::FieldSchema;

/// System instruction for extraction. `{fields}` is replaced with the JSON
/// field list.
const SYSTEM_TEMPLATE: &str = r#"You are a precise data extraction assistant. You read photographs and scans of documents, cards, receipts and labels and return structured data.

Follow these rules precisely:

1. ENTITIES
   - Detect ALL distinct entities in the image (for example several receipts, business cards or line items photographed together)
   - Produce one JSON object per entity

2. OUTPUT SHAPE
   - Always return a JSON array, even when there is exactly one entity
   - Never return a bare object
   - Return an empty array [] when the image contains no matching entity

3. FIELDS
   - Each object must use exactly these keys: {fields}
   - If a field is not present for an entity, set it to null; never omit the key
   - Copy text exactly as printed; do not translate or reformat it

4. FORMAT
   - Output ONLY the JSON array
   - Do NOT wrap the output in ```json fences
   - Do NOT add commentary or explanations"#;

/// Header for the caller's free-text instructions.
const CUSTOM_INSTRUCTIONS_HEADER: &str = "5. ADDITIONAL INSTRUCTIONS FROM THE USER";

/// Text part placed before a few-shot example image.
pub const EXAMPLE_INPUT_LABEL: &str = "Example input image:";

/// Prompt of the credential validation probe.
pub const VALIDATION_PROBE_PROMPT: &str = "Reply with the single word OK.";

/// Output cap of the credential validation probe.
pub const VALIDATION_PROBE_MAX_TOKENS: u32 = 5;

/// Build the system instruction for `schema`, appending `instructions`
/// verbatim when it is not blank.
pub fn system_instruction(schema: &FieldSchema, instructions: &str) -> String {
    let mut out = SYSTEM_TEMPLATE.replace("{fields}", &schema.to_json_list());
    if !instructions.trim().is_empty() {
        out.push_str("\n\n");
        out.push_str(CUSTOM_INSTRUCTIONS_HEADER);
        out.push('\n');
        out.push_str(instructions);
    }
    out
}

/// Text part following a few-shot example image.
pub fn example_output_label(records_json: &str) -> String {
    format!("Expected output for the example image above:\n{records_json}")
}

/// Closing instruction after the target image.
pub fn closing_instruction(schema: &FieldSchema) -> String {
    format!(
        "Extract the following fields from every entity in this image: {}. \
Return a JSON array with one object per entity.",
        schema.to_json_list()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_instruction_embeds_field_list() {
        let schema = FieldSchema::new(["name", "amount"]);
        let s = system_instruction(&schema, "");
        assert!(s.contains(r#"["name","amount"]"#));
        assert!(s.contains("JSON array"));
        assert!(s.contains("null"));
        assert!(!s.contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[test]
    fn custom_instructions_appended_verbatim() {
        let schema = FieldSchema::new(["total"]);
        let s = system_instruction(&schema, "Amounts are in EUR.\nIgnore tips.");
        assert!(s.ends_with("Amounts are in EUR.\nIgnore tips."));
    }

    #[test]
    fn blank_instructions_ignored() {
        let schema = FieldSchema::new(["total"]);
        assert_eq!(system_instruction(&schema, "   \n"), system_instruction(&schema, ""));
    }

    #[test]
    fn closing_names_fields() {
        let schema = FieldSchema::new(["a", "b"]);
        assert!(closing_instruction(&schema).contains(r#"["a","b"]"#));
    }
}
