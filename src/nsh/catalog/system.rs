//! `system/ui`: a singleton configuration object behind plain RPC calls.

use crate::commands::{Command, Invocation};
use crate::error::{NshError, Result};
use crate::namespace::{Namespace, PlainNamespace};
use crate::output::{ObjectItem, Output};
use crate::property::{PropertyMapping, PropertySet};
use crate::remote::Connection;
use crate::session::Session;
use crate::store::save::CallSaver;
use crate::store::SaveStrategy;
use crate::value::ValueType;
use serde_json::{json, Value as Json};

pub const GET_METHOD: &str = "system.ui.get_config";

fn ui_properties() -> Result<PropertySet> {
    PropertySet::new(vec![
        PropertyMapping::new("port", "port")
            .describe("HTTP port")
            .typed(ValueType::Number),
        PropertyMapping::new("https_port", "https_port")
            .describe("HTTPS port")
            .typed(ValueType::Number),
        PropertyMapping::new("redirect", "redirect")
            .describe("Redirect HTTP to HTTPS")
            .typed(ValueType::Boolean),
        PropertyMapping::new("language", "language")
            .describe("Interface language")
            .choices(&["en", "de", "fr"]),
        PropertyMapping::new("addresses", "addresses")
            .describe("Listen addresses")
            .typed(ValueType::Set),
    ])
}

struct ShowConfig {
    connection: Connection,
    properties: PropertySet,
}

impl Command for ShowConfig {
    fn description(&self) -> &str {
        "Show web interface settings"
    }

    fn run(&self, _session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(0, "show")?;
        let config = self.connection.call(GET_METHOD, &[])?;
        Ok(Output::Object(
            self.properties
                .iter()
                .map(|m| ObjectItem {
                    name: m.name.clone(),
                    description: m.description.clone(),
                    value: m.get(&config),
                    editable: true,
                })
                .collect(),
        ))
    }
}

struct SetConfig {
    saver: CallSaver,
    properties: PropertySet,
}

impl Command for SetConfig {
    fn description(&self) -> &str {
        "Change web interface settings"
    }

    fn run(&self, _session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        if inv.kwargs.is_empty() || !inv.args.is_empty() {
            return Err(NshError::Arity("set <property>=<value> ...".to_string()));
        }
        let mut patch = json!({});
        for (name, raw) in &inv.kwargs {
            self.properties.require(name)?.set_raw(&mut patch, raw)?;
        }
        Ok(Output::Task(self.saver.update(&Json::Null, &patch)?))
    }
}

pub fn system(connection: &Connection) -> Result<Namespace> {
    let ui = PlainNamespace::new("ui")
        .describe("Web interface")
        .command(
            "show",
            ShowConfig {
                connection: connection.clone(),
                properties: ui_properties()?,
            },
        )
        .command(
            "set",
            SetConfig {
                saver: CallSaver::new(connection.clone(), "system.ui"),
                properties: ui_properties()?,
            },
        )
        .build();

    Ok(PlainNamespace::new("system")
        .describe("System settings")
        .child(ui)
        .build())
}
