//! Collection aware field resolver used to compile API rules and list filters.
//!
//! Identifiers are resolved relative to a base collection:
//!
//! - `title`, `author.name`, `tags:length`, `data.items.0` for plain, relation and JSON paths;
//! - `comments_via_post.message` for back relations;
//! - `@collection.users:u.email` for joins with an arbitrary collection;
//! - `@request.auth.id`, `@request.body.title:isset`, `@request.headers.x_token` for request data.
//!
//! Unknown `@request.*` paths resolve to `NULL`; any other unresolvable path is an error.

mod runner;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

use crate::collection::Collection;
use crate::db::Db;
use crate::errors::{CoreError, CoreResult};
use crate::record::Record;
use crate::search::{FieldResolver, Join, ResolverResult, SelectQuery, register_join};
use crate::tools::inflector::columnify;

use runner::Runner;

/// Maximum number of relation hops in a single identifier.
pub const MAX_RELATION_DEPTH: usize = 6;

static ALLOWED_FIELDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\w+[\w\.\:]*$",
        r"^@request\.context$",
        r"^@request\.method$",
        r"^@request\.(auth|body|query|headers)\.[\w\.\:]*\w+$",
        r"^@collection\.\w+(\:\w+)?\.[\w\.\:]*\w+$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("allowed field pattern is valid"))
    .collect()
});

/// Snapshot of the request a rule is evaluated for.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Arbitrary caller label such as `default`, `oauth2` or `realtime`.
    pub context: String,
    pub method: String,
    pub query: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub body: Map<String, Value>,
    pub auth: Option<Record>,
}

impl RequestInfo {
    /// `@request.*` lookup data. Header names are lowercased with `-` replaced by `_`.
    fn static_data(&self) -> Map<String, Value> {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(key, value)| (key.to_lowercase().replace('-', "_"), value.clone()))
            .collect();

        let mut data = Map::new();
        data.insert("context".into(), Value::String(self.context.clone()));
        data.insert("method".into(), Value::String(self.method.to_uppercase()));
        data.insert("query".into(), Value::Object(self.query.clone()));
        data.insert("headers".into(), Value::Object(headers));
        data.insert("body".into(), Value::Object(self.body.clone()));
        data.insert(
            "auth".into(),
            self.auth.as_ref().map_or(Value::Null, |auth| Value::Object(auth.public_export(true))),
        );
        data
    }
}

/// Resolves record field identifiers of `base` into SQL.
///
/// Joins required by the resolved identifiers are collected and applied to the
/// final query by [`FieldResolver::update_query`].
pub struct RecordFieldResolver<'a> {
    db: &'a Db,
    base: Arc<Collection>,
    request_info: Option<&'a RequestInfo>,
    static_request_data: Map<String, Value>,
    allow_hidden_fields: bool,
    loaded_collections: Vec<Arc<Collection>>,
    joins: Vec<Join>,
}

impl<'a> RecordFieldResolver<'a> {
    pub fn new(db: &'a Db, base: &Collection, request_info: Option<&'a RequestInfo>, allow_hidden_fields: bool) -> Self {
        let base = Arc::new(base.clone());
        Self {
            db,
            static_request_data: request_info.map(RequestInfo::static_data).unwrap_or_default(),
            request_info,
            allow_hidden_fields,
            loaded_collections: vec![Arc::clone(&base)],
            base,
            joins: Vec::new(),
        }
    }

    pub fn base_collection(&self) -> &Collection {
        &self.base
    }

    /// Table alias of the base collection in the main query.
    pub fn base_alias(&self) -> String {
        columnify(&self.base.name)
    }

    /// Joins registered so far.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// `SELECT DISTINCT base.* FROM base` query to resolve identifiers against.
    pub fn base_query(&self) -> SelectQuery {
        SelectQuery::from(self.base.name.clone(), self.base_alias()).distinct(true)
    }

    fn register_join(&mut self, join: Join) {
        register_join(&mut self.joins, join);
    }

    /// Loads a collection by name or id, caching it for the following lookups.
    fn load_collection(&mut self, name_or_id: &str) -> CoreResult<Arc<Collection>> {
        if let Some(found) = self
            .loaded_collections
            .iter()
            .find(|c| c.id == name_or_id || c.name.eq_ignore_ascii_case(name_or_id))
        {
            return Ok(Arc::clone(found));
        }

        let collection = Arc::new(self.db.require_collection(name_or_id)?);
        self.loaded_collections.push(Arc::clone(&collection));
        Ok(collection)
    }
}

impl FieldResolver for RecordFieldResolver<'_> {
    fn resolve(&mut self, field: &str) -> CoreResult<ResolverResult> {
        if !ALLOWED_FIELDS.iter().any(|re| re.is_match(field)) {
            return Err(CoreError::filter(format!("failed to resolve field {field:?}")));
        }
        Runner::new(self, field).run()
    }

    fn update_query(&self, query: &mut SelectQuery) -> CoreResult<()> {
        if !self.joins.is_empty() {
            query.distinct = true;
        }
        for join in &self.joins {
            query.join(join.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{JsonField, NumberField, RelationField, SelectField, TextField};
    use crate::search::FilterData;

    fn setup() -> (Db, Collection, Collection) {
        let db = Db::open_in_memory().unwrap();

        let mut authors = Collection::new_base("authors");
        authors.fields.add(TextField::new("name").into());
        let mut secret = TextField::new("secret");
        secret.base.hidden = true;
        authors.fields.add(secret.into());
        db.save_collection(&mut authors).unwrap();

        let mut posts = Collection::new_base("posts");
        posts.fields.add(TextField::new("title").into());
        posts.fields.add(NumberField::new("views").into());
        posts.fields.add(SelectField::new("tags", &["a", "b", "c"]).multiple(3).into());
        posts.fields.add(JsonField::new("meta").into());
        posts.fields.add(RelationField::new("author", authors.id.clone()).into());
        posts.fields.add(RelationField::new("editors", authors.id.clone()).multiple(5).into());
        db.save_collection(&mut posts).unwrap();

        (db, authors, posts)
    }

    #[test]
    fn test_resolve_plain_and_json_fields() {
        let (db, _, posts) = setup();
        let mut resolver = RecordFieldResolver::new(&db, &posts, None, false);

        let title = resolver.resolve("title").unwrap();
        assert_eq!(title.identifier, "`posts`.`title`");
        assert!(title.multi_match.is_none());

        let meta = resolver.resolve("meta.a.0").unwrap();
        assert!(meta.no_coalesce);
        assert!(meta.identifier.contains("'$.a[0]'"));

        let lower = resolver.resolve("title:lower").unwrap();
        assert_eq!(lower.identifier, "LOWER(`posts`.`title`)");

        assert!(resolver.resolve("missing").is_err());
        assert!(resolver.resolve("title:isset").is_err());
        assert!(resolver.resolve("a b").is_err());
    }

    #[test]
    fn test_resolve_relations() {
        let (db, _, posts) = setup();
        let mut resolver = RecordFieldResolver::new(&db, &posts, None, false);

        let single = resolver.resolve("author.name").unwrap();
        assert_eq!(single.identifier, "`posts_author`.`name`");
        assert!(single.multi_match.is_none());

        let short = resolver.resolve("author.id").unwrap();
        assert_eq!(short.identifier, "`posts`.`author`");

        let multi = resolver.resolve("editors.name").unwrap();
        let mm = multi.multi_match.expect("multi match subquery");
        assert!(!mm.universal);
        assert!(mm.build().contains("`__mm_posts_editors`"));

        assert!(resolver.resolve("author.secret").is_err());
        assert!(resolver.resolve("title.name").is_err());

        let mut query = resolver.base_query();
        resolver.update_query(&mut query).unwrap();
        let aliases: Vec<&str> = query.joins.iter().map(|j| j.table_alias.as_str()).collect();
        assert_eq!(aliases, vec!["posts_author", "posts_editors_je", "posts_editors"]);
    }

    #[test]
    fn test_resolve_multiple_field_modifiers() {
        let (db, _, posts) = setup();
        let mut resolver = RecordFieldResolver::new(&db, &posts, None, false);

        let length = resolver.resolve("tags:length").unwrap();
        assert!(length.identifier.starts_with("json_array_length("));
        assert!(length.multi_match.is_none());

        let each = resolver.resolve("tags:each").unwrap();
        assert!(each.multi_match.expect("each subquery").universal);

        let any = resolver.resolve("tags").unwrap();
        assert_eq!(any.identifier, "`posts_tags_je`.`value`");
        assert!(!any.multi_match.expect("multi match subquery").universal);

        assert!(resolver.resolve("title:each").is_err());
        assert!(resolver.resolve("title:length").is_err());
    }

    #[test]
    fn test_resolve_request_fields() {
        let (db, authors, posts) = setup();

        let mut author = Record::new(Arc::new(authors));
        author.set("id", "a1");
        author.set("name", "Ann");

        let mut info = RequestInfo {
            method: "post".into(),
            auth: Some(author),
            ..RequestInfo::default()
        };
        info.body.insert("views".into(), Value::from("12"));
        info.body.insert("tags".into(), Value::from(vec!["a", "b"]));
        info.headers.insert("X-Token".into(), Value::from("abc"));

        let mut resolver = RecordFieldResolver::new(&db, &posts, Some(&info), false);

        let auth_id = resolver.resolve("@request.auth.id").unwrap();
        assert!(auth_id.identifier.starts_with(':'));
        assert_eq!(auth_id.params[0].1, rusqlite::types::Value::Text("a1".into()));

        let views = resolver.resolve("@request.body.views").unwrap();
        assert_eq!(views.params[0].1, rusqlite::types::Value::Integer(12));

        assert_eq!(resolver.resolve("@request.body.views:isset").unwrap().identifier, "TRUE");
        assert_eq!(resolver.resolve("@request.body.title:isset").unwrap().identifier, "FALSE");
        assert_eq!(resolver.resolve("@request.body.tags:length").unwrap().identifier, "2");
        assert_eq!(resolver.resolve("@request.query.missing").unwrap().identifier, "NULL");
        assert_eq!(resolver.resolve("@request.unknown.field").is_err(), true);

        let header = resolver.resolve("@request.headers.x_token").unwrap();
        assert_eq!(header.params[0].1, rusqlite::types::Value::Text("abc".into()));

        let each = resolver.resolve("@request.body.tags:each").unwrap();
        assert!(each.multi_match.expect("each subquery").universal);

        let mut anonymous = RecordFieldResolver::new(&db, &posts, None, false);
        assert_eq!(anonymous.resolve("@request.auth.id").unwrap().identifier, "NULL");
    }

    #[test]
    fn test_collection_join_uses_main_query() {
        let (db, _, posts) = setup();
        let mut resolver = RecordFieldResolver::new(&db, &posts, None, false);

        let result = resolver.resolve("@collection.authors:a.name").unwrap();
        assert_eq!(result.identifier, "`__collection_authors_a`.`name`");
        assert!(result.multi_match.is_none());

        // the same alias reuses the join, another alias adds a new one
        resolver.resolve("@collection.authors:a.id").unwrap();
        resolver.resolve("@collection.authors.name").unwrap();
        let aliases: Vec<&str> = resolver.joins().iter().map(|j| j.table_alias.as_str()).collect();
        assert_eq!(aliases, vec!["__collection_authors_a", "__collection_authors"]);
        assert!(resolver.joins()[0].on.is_none());

        assert!(resolver.resolve("@collection.missing.name").is_err());
    }

    #[test]
    fn test_relation_depth_is_capped() {
        let db = Db::open_in_memory().unwrap();
        let mut chain = Collection::new_base("chain");
        chain.fields.add(TextField::new("title").into());
        chain.fields.add(RelationField::new("next", chain.id.clone()).into());
        db.save_collection(&mut chain).unwrap();

        let mut resolver = RecordFieldResolver::new(&db, &chain, None, false);
        let deepest = ["next"; MAX_RELATION_DEPTH].join(".");
        assert!(resolver.resolve(&format!("{deepest}.id")).is_ok());
        assert!(resolver.resolve(&format!("{deepest}.title")).is_ok());

        let err = resolver.resolve(&format!("{deepest}.next.title")).unwrap_err();
        assert!(err.to_string().contains("max nested relations"), "{err}");
    }

    #[test]
    fn test_rule_expression_builds() {
        let (db, _, posts) = setup();
        let mut resolver = RecordFieldResolver::new(&db, &posts, None, false);
        let expr = FilterData::new("editors.name ?= 'x' && tags:each ~ 'a' && author.name != ''")
            .build_expr(&mut resolver)
            .unwrap();
        assert!(expr.sql.contains("EXISTS (SELECT 1 FROM (SELECT `__mm_posts_editors`.`name`"));
        assert!(expr.sql.contains("NOT EXISTS (SELECT 1 FROM"));
    }
}
