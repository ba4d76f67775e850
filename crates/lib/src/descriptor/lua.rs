//! Lua evaluation of build descriptors.
//!
//! Registers the `kiln` global:
//! - `kiln.dir` - directory of the descriptor being evaluated
//! - `kiln.platform`, `kiln.os`, `kiln.arch` - host platform
//! - `kiln.workdir(path)`, `kiln.copy(src, dest)`, `kiln.install(manifest)`,
//!   `kiln.env(key, value)`, `kiln.expose(port)`, `kiln.cmd(argv)` - step
//!   constructors returning `{ op = ..., ... }` tables

use std::path::Path;

use mlua::prelude::*;
use tracing::debug;

use super::{Descriptor, DescriptorError, Step};
use crate::image::{ImageRef, StartCommand};
use crate::platform::Platform;

/// Create a Lua VM with the `kiln` global registered.
pub fn create_runtime() -> LuaResult<Lua> {
  let lua = Lua::new();
  let kiln = lua.create_table()?;

  let platform = Platform::current().ok_or_else(|| LuaError::external("unsupported platform"))?;
  kiln.set("platform", platform.triple())?;
  kiln.set("os", platform.os.as_str())?;
  kiln.set("arch", platform.arch.as_str())?;

  let workdir = lua.create_function(|lua, path: String| {
    let step = lua.create_table()?;
    step.set("op", "workdir")?;
    step.set("path", path)?;
    Ok(step)
  })?;
  kiln.set("workdir", workdir)?;

  let copy = lua.create_function(|lua, (src, dest): (String, Option<String>)| {
    let step = lua.create_table()?;
    step.set("op", "copy")?;
    step.set("src", src)?;
    step.set("dest", dest.unwrap_or_else(|| ".".to_string()))?;
    Ok(step)
  })?;
  kiln.set("copy", copy)?;

  let install = lua.create_function(|lua, manifest: String| {
    let step = lua.create_table()?;
    step.set("op", "install")?;
    step.set("manifest", manifest)?;
    Ok(step)
  })?;
  kiln.set("install", install)?;

  let env = lua.create_function(|lua, (key, value): (String, String)| {
    let step = lua.create_table()?;
    step.set("op", "env")?;
    step.set("key", key)?;
    step.set("value", value)?;
    Ok(step)
  })?;
  kiln.set("env", env)?;

  // Validation happens when the step list is parsed
  let expose = lua.create_function(|lua, port: LuaValue| {
    let step = lua.create_table()?;
    step.set("op", "expose")?;
    step.set("port", port)?;
    Ok(step)
  })?;
  kiln.set("expose", expose)?;

  let cmd = lua.create_function(|lua, argv: LuaTable| {
    let step = lua.create_table()?;
    step.set("op", "cmd")?;
    step.set("argv", argv)?;
    Ok(step)
  })?;
  kiln.set("cmd", cmd)?;

  lua.globals().set("kiln", kiln)?;
  Ok(lua)
}

/// Execute the Lua file at `path` with `kiln.dir` set to its directory.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot canonicalize '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;

  let kiln = lua.globals().get::<LuaTable>("kiln")?;
  kiln.set(
    "dir",
    canonical_path
      .parent()
      .unwrap_or(Path::new(""))
      .to_string_lossy()
      .to_string(),
  )?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .eval::<LuaValue>()
}

pub fn load_descriptor(path: &Path) -> Result<Descriptor, DescriptorError> {
  let canonical = dunce::canonicalize(path).map_err(|e| DescriptorError::Read {
    path: path.to_path_buf(),
    message: e.to_string(),
  })?;
  let dir = canonical.parent().unwrap_or(Path::new("")).to_path_buf();

  let lua = create_runtime()?;
  let result = load_file(&lua, &canonical)?;
  let LuaValue::Table(table) = result else {
    return Err(DescriptorError::Invalid("descriptor must return a table".to_string()));
  };

  let base: Option<String> = table.get("base")?;
  let base = base.ok_or_else(|| DescriptorError::Invalid("`base` is required".to_string()))?;
  let tag: Option<String> = table.get("tag")?;
  let runtime: Option<String> = table.get("runtime")?;

  let steps = match table.get::<LuaValue>("steps")? {
    LuaValue::Table(steps) => parse_steps(&steps)?,
    LuaValue::Nil => return Err(DescriptorError::Invalid("`steps` is required".to_string())),
    other => {
      return Err(DescriptorError::Invalid(format!(
        "`steps` must be a table, got {}",
        other.type_name()
      )));
    }
  };

  debug!(path = %canonical.display(), steps = steps.len(), "descriptor loaded");

  Ok(Descriptor {
    path: canonical,
    dir,
    tag: tag.as_deref().map(ImageRef::parse).transpose()?,
    base: ImageRef::parse(&base)?,
    runtime,
    steps,
  })
}

fn parse_steps(steps: &LuaTable) -> Result<Vec<Step>, DescriptorError> {
  let mut parsed = Vec::new();
  for (index, value) in steps.sequence_values::<LuaValue>().enumerate() {
    let LuaValue::Table(step) = value? else {
      return Err(DescriptorError::Invalid(format!("step {} is not a table", index + 1)));
    };
    parsed.push(parse_step(index + 1, &step)?);
  }
  Ok(parsed)
}

fn parse_step(index: usize, step: &LuaTable) -> Result<Step, DescriptorError> {
  let op: String = required(index, step, "op")?;

  let step = match op.as_str() {
    "workdir" => Step::Workdir(required(index, step, "path")?),
    "copy" => Step::Copy {
      src: required(index, step, "src")?,
      dest: step.get::<Option<String>>("dest")?.unwrap_or_else(|| ".".to_string()),
    },
    "install" => Step::Install {
      manifest: required(index, step, "manifest")?,
    },
    "env" => Step::Env {
      key: required(index, step, "key")?,
      value: required(index, step, "value")?,
    },
    "expose" => Step::Expose(parse_port(index, step.get("port")?)?),
    "cmd" => {
      let argv: LuaTable = step.get::<Option<LuaTable>>("argv")?.ok_or_else(|| {
        DescriptorError::Invalid(format!("step {}: cmd requires an argv table", index))
      })?;
      let argv = argv.sequence_values::<String>().collect::<LuaResult<Vec<_>>>()?;
      let command = StartCommand::from_argv(argv)
        .ok_or_else(|| DescriptorError::Invalid(format!("step {}: cmd must not be empty", index)))?;
      Step::Cmd(command)
    }
    other => {
      return Err(DescriptorError::Invalid(format!(
        "step {}: unknown op `{}`",
        index, other
      )));
    }
  };

  Ok(step)
}

fn required(index: usize, step: &LuaTable, field: &str) -> Result<String, DescriptorError> {
  step
    .get::<Option<String>>(field)?
    .ok_or_else(|| DescriptorError::Invalid(format!("step {}: missing `{}`", index, field)))
}

fn parse_port(index: usize, value: LuaValue) -> Result<u16, DescriptorError> {
  let number = match value {
    LuaValue::Integer(i) => Some(i),
    LuaValue::Number(n) if n.fract() == 0.0 => Some(n as i64),
    _ => None,
  };

  number
    .and_then(|n| u16::try_from(n).ok())
    .filter(|port| *port != 0)
    .ok_or_else(|| DescriptorError::Invalid(format!("step {}: port must be an integer in 1..=65535", index)))
}
