//! A toy scene standing in for real host state, and skills that edit it.
//!
//! The scene lives in an `Rc<RefCell<_>>`: it can only be touched from the
//! thread that created it, which is exactly what the execution driver
//! guarantees.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::SkillFailure;
use crate::skills::{Args, FnSkill, ParamSpec, ParamType, SkillRegistry};

pub type SharedScene = Rc<RefCell<Scene>>;

const KINDS: [&str; 3] = ["cube", "sphere", "empty"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneObject {
    pub name: String,
    pub kind: String,
    pub tag: String,
    pub position: [f64; 3],
    /// `None` for objects that render nothing.
    pub color: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    name: String,
    objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: Vec::new(),
        }
    }

    pub fn shared(name: &str) -> SharedScene {
        Rc::new(RefCell::new(Self::new(name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn add(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    /// First object with this name. Names need not be unique.
    pub fn find(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<SceneObject> {
        let index = self.objects.iter().position(|o| o.name == name)?;
        Some(self.objects.remove(index))
    }

    pub fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a SceneObject> {
        self.objects.iter().filter(move |o| o.tag == tag)
    }
}

fn not_found(name: &str) -> anyhow::Error {
    SkillFailure::new("ObjectNotFound", format!("GameObject '{name}' not found")).into()
}

fn position(args: &Args) -> Result<[f64; 3]> {
    Ok([args.f64("x")?, args.f64("y")?, args.f64("z")?])
}

/// Register the scene skills against `scene`.
pub fn register_scene_skills(registry: &mut SkillRegistry, scene: &SharedScene) {
    let s = Rc::clone(scene);
    registry.register(
        FnSkill::new(
            "create_object",
            "Create an object in the scene at the specified position",
            move |args| {
                let kind = args.str("kind")?.to_ascii_lowercase();
                if !KINDS.contains(&kind.as_str()) {
                    return Err(SkillFailure::new(
                        "InvalidArgument",
                        format!("Unknown kind '{kind}', expected one of {}", KINDS.join(", ")),
                    )
                    .into());
                }
                let name = args.str("name")?.to_string();
                let [x, y, z] = position(args)?;
                let color = (kind != "empty").then_some([1.0, 1.0, 1.0]);
                s.borrow_mut().add(SceneObject {
                    name: name.clone(),
                    kind: kind.clone(),
                    tag: args.str("tag")?.to_string(),
                    position: [x, y, z],
                    color,
                });
                Ok(json!(format!("Created {kind} '{name}' at ({x}, {y}, {z})")))
            },
        )
        .param(ParamSpec::optional("kind", ParamType::String, "cube").describe("cube, sphere or empty"))
        .param(ParamSpec::optional("name", ParamType::String, "Cube"))
        .param(ParamSpec::optional("x", ParamType::Number, 0.0))
        .param(ParamSpec::optional("y", ParamType::Number, 0.0))
        .param(ParamSpec::optional("z", ParamType::Number, 0.0))
        .param(ParamSpec::optional("tag", ParamType::String, "Untagged")),
    );

    let s = Rc::clone(scene);
    registry.register(
        FnSkill::new("delete_object", "Delete an object by name", move |args| {
            let name = args.str("objectName")?;
            s.borrow_mut().remove(name).ok_or_else(|| not_found(name))?;
            Ok(json!(format!("Deleted GameObject '{name}'")))
        })
        .param(
            ParamSpec::required("objectName", ParamType::String)
                .describe("Name of the object to delete"),
        ),
    );

    let s = Rc::clone(scene);
    registry.register(
        FnSkill::new(
            "set_object_color",
            "Set the color of an object's material",
            move |args| {
                let name = args.str("objectName")?;
                let rgb = [args.f64("r")?, args.f64("g")?, args.f64("b")?];
                let mut scene = s.borrow_mut();
                let object = scene.find_mut(name).ok_or_else(|| not_found(name))?;
                let Some(color) = object.color.as_mut() else {
                    return Err(SkillFailure::new(
                        "NoRenderer",
                        format!("GameObject '{name}' has no renderer"),
                    )
                    .into());
                };
                *color = rgb;
                Ok(json!(format!(
                    "Set color of '{name}' to ({}, {}, {})",
                    rgb[0], rgb[1], rgb[2]
                )))
            },
        )
        .param(
            ParamSpec::required("objectName", ParamType::String)
                .describe("Name of the object to modify"),
        )
        .param(ParamSpec::optional("r", ParamType::Number, 1.0).describe("Red component (0-1)"))
        .param(ParamSpec::optional("g", ParamType::Number, 1.0).describe("Green component (0-1)"))
        .param(ParamSpec::optional("b", ParamType::Number, 1.0).describe("Blue component (0-1)")),
    );

    let s = Rc::clone(scene);
    registry.register(FnSkill::new(
        "get_scene_info",
        "Get information about the current scene",
        move |_| {
            let scene = s.borrow();
            let names: Vec<&str> = scene.objects().iter().map(|o| o.name.as_str()).collect();
            Ok(json!({
                "sceneName": scene.name(),
                "rootObjectCount": scene.len(),
                "rootObjects": names,
            }))
        },
    ));

    let s = Rc::clone(scene);
    registry.register(
        FnSkill::new(
            "find_objects_by_tag",
            "Find all objects with a specific tag",
            move |args| {
                let tag = args.str("tag")?;
                let scene = s.borrow();
                let objects: Vec<Value> = scene
                    .with_tag(tag)
                    .map(|o| {
                        json!({
                            "name": o.name,
                            "position": {"x": o.position[0], "y": o.position[1], "z": o.position[2]},
                        })
                    })
                    .collect();
                Ok(json!({
                    "tag": tag,
                    "count": objects.len(),
                    "objects": objects,
                }))
            },
        )
        .param(ParamSpec::required("tag", ParamType::String).describe("Tag to search for")),
    );
}
