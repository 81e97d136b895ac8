use grafana_autotask_datasource::AutotaskPlugin;

#[grafana_plugin_sdk::main(services(data, diagnostics, resource), init_subscriber = true)]
async fn plugin() -> AutotaskPlugin {
    AutotaskPlugin::new()
}
