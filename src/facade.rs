//! One-shot operations against a manager or extension endpoint.
//!
//! Every operation follows one template: refuse when extensions are
//! disabled, probe the endpoint once for readiness, open a one-shot
//! client, translate the wire response into native types. Transport
//! failures surface as "Extension call failed: ...".

use crate::config::{ExtensionsConfig, HOST_VERSION, SDK_VERSION};
use crate::endpoint;
use crate::error::ExtensionError;
use crate::registry::{PluginRequest, RouteUuid, Row};
use crate::rpc::RpcClient;
use crate::rpc::protocol::{
    ColumnInfo, ColumnOptions, ColumnType, ExtensionInfo, ExtensionList,
};

fn check_enabled(config: &ExtensionsConfig) -> Result<(), ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    Ok(())
}

/// Pings the endpoint at `path`.
pub fn ping_extension(config: &ExtensionsConfig, path: &str) -> Result<(), ExtensionError> {
    check_enabled(config)?;
    endpoint::ready(path, config, false)?;

    let status = RpcClient::connect(path)
        .and_then(|mut client| client.ping())
        .map_err(|e| ExtensionError::CallFailed(e.detail()))?;
    status.into_result().map(|_| ())
}

/// Runs a SQL query on the manager, returning the result rows.
pub fn query(config: &ExtensionsConfig, sql: &str) -> Result<Vec<Row>, ExtensionError> {
    check_enabled(config)?;
    let path = &config.extensions_socket;
    endpoint::ready(path, config, false)?;

    let response = RpcClient::connect(path)
        .and_then(|mut client| client.query(sql))
        .map_err(|e| ExtensionError::CallFailed(e.detail()))?;
    response.status.into_result()?;
    Ok(response.rows)
}

/// Resolves the column schema of a SQL query on the manager.
pub fn get_query_columns(
    config: &ExtensionsConfig,
    sql: &str,
) -> Result<Vec<ColumnInfo>, ExtensionError> {
    check_enabled(config)?;
    let path = &config.extensions_socket;
    endpoint::ready(path, config, false)?;

    let response = RpcClient::connect(path)
        .and_then(|mut client| client.query_columns(sql))
        .map_err(|e| ExtensionError::CallFailed(e.detail()))?;
    response.status.into_result()?;

    // Each response row is a single {column_name: type_name} entry.
    let mut columns = Vec::new();
    for row in &response.rows {
        for (name, type_name) in row {
            columns.push(ColumnInfo {
                name: name.clone(),
                column_type: ColumnType::from_name(type_name),
                options: ColumnOptions::default(),
            });
        }
    }
    Ok(columns)
}

/// Calls a plugin item on the extension holding `uuid`.
pub fn call_extension(
    config: &ExtensionsConfig,
    uuid: RouteUuid,
    registry: &str,
    item: &str,
    request: &PluginRequest,
) -> Result<Vec<Row>, ExtensionError> {
    let path = endpoint::extension_endpoint(uuid, &config.extensions_socket);
    call_extension_path(config, &path, registry, item, request)
}

/// Calls a plugin item on the endpoint at `path`.
pub fn call_extension_path(
    config: &ExtensionsConfig,
    path: &str,
    registry: &str,
    item: &str,
    request: &PluginRequest,
) -> Result<Vec<Row>, ExtensionError> {
    check_enabled(config)?;
    endpoint::ready(path, config, false)?;

    let response = RpcClient::connect(path)
        .and_then(|mut client| client.call(registry, item, request))
        .map_err(|e| ExtensionError::CallFailed(e.detail()))?;
    response.status.into_result()?;
    Ok(response.rows)
}

/// Lists the manager's extensions.
///
/// Index 0 always holds a synthetic record for the manager itself, so
/// callers can treat the host as one more extension.
pub fn get_extensions(config: &ExtensionsConfig) -> Result<ExtensionList, ExtensionError> {
    check_enabled(config)?;
    let path = &config.extensions_socket;
    endpoint::ready(path, config, false)?;

    let mut extensions = RpcClient::connect(path)
        .and_then(|mut client| client.extensions())
        .map_err(|e| ExtensionError::CallFailed(e.detail()))?;

    extensions.insert(
        0,
        ExtensionInfo {
            name: "core".to_string(),
            version: HOST_VERSION.to_string(),
            sdk_version: "0.0.0".to_string(),
            min_sdk_version: SDK_VERSION.to_string(),
        },
    );
    Ok(extensions)
}
