//! JSON schema for `itpkg.json`.
//!
//! The schema checks value types and the closed policy shape. Semantic
//! rules (non-empty fields, entry presence) belong to the validator so they
//! can be reported together with layout findings.

/// JSON Schema for itpkg.json.
pub const MANIFEST_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "Intent Package Manifest",
  "type": "object",
  "properties": {
    "name": { "type": "string" },
    "version": { "type": "string" },
    "description": { "type": "string" },
    "entry": { "type": ["string", "null"] },
    "type": { "type": ["string", "null"], "enum": ["app", "lib", null] },
    "itmlVersion": { "type": "string" },
    "capabilities": {
      "type": "array",
      "items": { "type": "string" }
    },
    "policies": {
      "type": ["object", "null"],
      "additionalProperties": false,
      "properties": {
        "security": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "network": {
              "type": "object",
              "additionalProperties": false,
              "properties": {
                "outbound": { "$ref": "#/definitions/ruleSet" },
                "inbound": { "$ref": "#/definitions/ruleSet" }
              }
            },
            "filesystem": {
              "type": "object",
              "additionalProperties": false,
              "properties": {
                "read": { "type": "array", "items": { "type": "string" } },
                "write": { "type": "array", "items": { "type": "string" } }
              }
            }
          }
        },
        "privacy": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "pii": {
              "type": "object",
              "additionalProperties": false,
              "properties": {
                "export": { "type": "string", "enum": ["allow", "deny"] }
              }
            }
          }
        },
        "energy": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "mode": { "type": "string", "enum": ["low", "balanced", "performance"] }
          }
        }
      }
    },
    "meta": {
      "type": ["object", "null"],
      "properties": {
        "signature": {
          "type": ["object", "null"],
          "required": ["algorithm"],
          "properties": {
            "algorithm": { "type": "string" },
            "keyId": { "type": ["string", "null"] }
          }
        }
      }
    }
  },
  "definitions": {
    "ruleSet": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "allow": { "type": "array", "items": { "type": "string" } },
        "deny": { "type": "array", "items": { "type": "string" } }
      }
    }
  }
}"##;

/// Get the manifest schema as a parsed JSON value.
pub fn manifest_schema() -> serde_json::Value {
    serde_json::from_str(MANIFEST_SCHEMA).expect("Invalid manifest schema")
}
