use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::Value;
use minijinja::Environment;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::repo::EnvRepository;

/// Process-identity helpers exposed to templates as bare functions,
/// independent of any single render call.
#[derive(Clone)]
pub struct TemplateFuncs {
    pub is_agent: bool,
    pub master_host: String,
    pub master_port: u16,
}

/// Renders a named template string against a flat variable map, with the
/// panel's function surface (`panel_env`, `is_agent`, `master_host`,
/// `master_port`) available inside it. `panel_env` reads from `envs`, the
/// persisted `Env` table, which is distinct from `variables` (the
/// per-deployment context built from `qa_values`/`App.qa`/implicit vars).
pub async fn render(
    name: &str,
    source: &str,
    variables: &BTreeMap<String, String>,
    envs: &Arc<dyn EnvRepository>,
    funcs: &TemplateFuncs,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)
        .map_err(|e| Error::custom(ErrorKind::BadRequest, format!("invalid template {name}: {e}")))?;

    let env_rows: BTreeMap<String, String> =
        envs.list().await?.into_iter().map(|row| (row.key, row.value)).collect();
    let env_lookup = Arc::new(env_rows);
    let lookup_for_panel_env = env_lookup.clone();
    env.add_function("panel_env", move |key: String, default: Option<String>| -> Value {
        Value::from(
            lookup_for_panel_env
                .get(&key)
                .cloned()
                .or(default)
                .unwrap_or_default(),
        )
    });

    let is_agent = funcs.is_agent;
    env.add_function("is_agent", move || -> Value { Value::from(is_agent) });

    let master_host = funcs.master_host.clone();
    env.add_function("master_host", move || -> Value { Value::from(master_host.clone()) });

    let master_port = funcs.master_port;
    env.add_function("master_port", move || -> Value { Value::from(master_port) });

    let template = env
        .get_template(name)
        .map_err(|e| Error::custom(ErrorKind::BadRequest, e.to_string()))?;
    let ctx = minijinja::value::Value::from_serialize(variables);
    template
        .render(ctx)
        .map_err(|e| Error::custom(ErrorKind::BadRequest, format!("render {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use panel_common::models::Env;

    struct FakeEnvRepository(Vec<Env>);

    #[async_trait]
    impl EnvRepository for FakeEnvRepository {
        async fn get_by_key(&self, key: &str) -> Result<Option<Env>> {
            Ok(self.0.iter().find(|e| e.key == key).cloned())
        }
        async fn list(&self) -> Result<Vec<Env>> {
            Ok(self.0.clone())
        }
        async fn upsert(&self, env: Env) -> Result<Env> {
            Ok(env)
        }
        async fn delete(&self, _id: i64) -> Result<()> {
            Ok(())
        }
    }

    fn funcs() -> TemplateFuncs {
        TemplateFuncs {
            is_agent: false,
            master_host: "10.0.0.1".into(),
            master_port: 8000,
        }
    }

    fn no_envs() -> Arc<dyn EnvRepository> {
        Arc::new(FakeEnvRepository(vec![]))
    }

    #[tokio::test]
    async fn substitutes_variables_and_funcs() {
        let mut vars = BTreeMap::new();
        vars.insert("APP_NAME".to_string(), "demo".to_string());
        let out = render(
            "t",
            "{{ APP_NAME }} on {{ master_host() }}:{{ master_port() }}",
            &vars,
            &no_envs(),
            &funcs(),
        )
        .await
        .unwrap();
        assert_eq!(out, "demo on 10.0.0.1:8000");
    }

    #[tokio::test]
    async fn single_pass_is_idempotent_without_directives() {
        let vars = BTreeMap::new();
        let out = render("t", "static text", &vars, &no_envs(), &funcs()).await.unwrap();
        let out2 = render("t2", &out, &BTreeMap::new(), &no_envs(), &funcs()).await.unwrap();
        assert_eq!(out, out2);
    }

    #[tokio::test]
    async fn panel_env_reads_from_env_repository_not_variables() {
        let envs: Arc<dyn EnvRepository> = Arc::new(FakeEnvRepository(vec![Env {
            id: 1,
            key: "REGISTRY_HOST".into(),
            value: "registry.internal".into(),
            scope: "global".into(),
            created_at: panel_common::models::timestamp(),
            updated_at: panel_common::models::timestamp(),
        }]));
        let mut vars = BTreeMap::new();
        vars.insert("REGISTRY_HOST".to_string(), "should-not-be-used".to_string());

        let out = render("t", "{{ panel_env('REGISTRY_HOST', 'fallback') }}", &vars, &envs, &funcs())
            .await
            .unwrap();
        assert_eq!(out, "registry.internal");

        let out = render("t2", "{{ panel_env('MISSING', 'fallback') }}", &vars, &envs, &funcs())
            .await
            .unwrap();
        assert_eq!(out, "fallback");
    }
}
