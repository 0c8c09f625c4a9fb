//! The operation registry: named, parameterized skills and their manifest.
//!
//! A [`SkillRegistry`] is owned by the execution thread. It is never shared
//! between threads, so skills are free to hold single-threaded host state
//! (`Rc<RefCell<_>>` and friends).

pub mod args;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use crate::consts::MANIFEST_VERSION;
use crate::error::{SkillError, SkillFailure};

pub use args::Args;

/// Semantic type of a declared parameter, as advertised in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

/// One declared parameter of a skill.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ParamSpec {
    /// A parameter the caller must supply.
    pub fn required(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: None,
        }
    }

    /// A parameter that falls back to `default` when omitted.
    pub fn optional(name: &str, kind: ParamType, default: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: Some(default.into()),
            description: None,
        }
    }

    /// A parameter that binds to `null` when omitted.
    pub fn nullable(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Something the host can do on request.
pub trait Skill {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    /// Run the skill. Called on the execution thread only, with arguments
    /// already bound against [`Skill::params`].
    fn execute(&self, args: &Args) -> Result<Value>;
}

type SkillFn = Box<dyn Fn(&Args) -> Result<Value>>;

/// Adapter that turns a closure into a [`Skill`].
pub struct FnSkill {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    run: SkillFn,
}

impl FnSkill {
    /// Build a skill from a closure.
    pub fn new(
        name: &str,
        description: &str,
        run: impl Fn(&Args) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
            run: Box::new(run),
        }
    }

    /// Build a skill whose name is derived from a CamelCase identifier.
    pub fn from_ident(
        ident: &str,
        description: Option<&str>,
        run: impl Fn(&Args) -> Result<Value> + 'static,
    ) -> Self {
        let name = to_snake_case(ident);
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Skill: {name}"));
        Self {
            name,
            description,
            params: Vec::new(),
            run: Box::new(run),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }
}

impl Skill for FnSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, args: &Args) -> Result<Value> {
        (self.run)(args)
    }
}

/// Manifest entry for one parameter.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    pub default_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Manifest entry for one skill.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub parameters: Vec<ParamDescriptor>,
}

/// Holds all registered skills, keyed case-insensitively.
pub struct SkillRegistry {
    skills: BTreeMap<String, Box<dyn Skill>>,
    base_url: String,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: BTreeMap::new(),
            base_url: String::new(),
        }
    }

    /// Base URL advertised in the manifest.
    pub fn set_base_url(&mut self, url: &str) {
        self.base_url = url.to_string();
    }

    /// Register a skill, replacing any skill with the same name.
    pub fn register(&mut self, skill: impl Skill + 'static) {
        self.register_boxed(Box::new(skill));
    }

    pub fn register_boxed(&mut self, skill: Box<dyn Skill>) {
        self.skills.insert(skill.name().to_ascii_lowercase(), skill);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.skills.remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Replace the whole skill table.
    pub fn refresh(&mut self, skills: Vec<Box<dyn Skill>>) {
        self.skills.clear();
        for skill in skills {
            self.register_boxed(skill);
        }
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.skills.values().map(|s| s.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<SkillDescriptor> {
        self.skills
            .values()
            .map(|s| SkillDescriptor {
                name: s.name().to_string(),
                description: s.description().to_string(),
                endpoint: format!("POST /skill/{}", s.name()),
                parameters: s
                    .params()
                    .iter()
                    .map(|p| ParamDescriptor {
                        name: p.name.clone(),
                        kind: p.kind,
                        required: p.required,
                        default_value: p.default.clone(),
                        description: p.description.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// The manifest served on `GET /skills`.
    pub fn manifest(&self) -> Value {
        json!({
            "version": MANIFEST_VERSION,
            "baseUrl": self.base_url,
            "skills": self.descriptors(),
        })
    }

    /// Bind `payload` against the named skill's parameters and run it.
    ///
    /// On success returns the `{status, skill, result}` envelope.
    pub fn execute(&self, name: &str, payload: &str) -> Result<Value, SkillError> {
        let skill = self
            .skills
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| SkillError::NotFound {
                name: name.to_string(),
                available: self.names(),
            })?;

        let raw = args::parse_payload(payload)?;
        let bound = args::bind(skill.params(), &raw)?;

        match skill.execute(&bound) {
            Ok(result) => Ok(json!({
                "status": "success",
                "skill": skill.name(),
                "result": result,
            })),
            Err(e) => Err(match e.downcast_ref::<SkillFailure>() {
                Some(failure) => SkillError::Failed {
                    category: failure.category.clone(),
                    message: failure.message.clone(),
                },
                None => SkillError::Failed {
                    category: "OperationFailed".to_string(),
                    message: format!("{e:#}"),
                },
            }),
        }
    }
}

/// `CreateCube` -> `create_cube`, `getHTTPStatus2Code` -> `get_httpstatus2_code`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase()
            && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
        prev = Some(c);
    }
    out
}
