use super::{AppState, router};
use crate::Result;
use crate::catalog::{DbCatalog, TableFilter};
use crate::config::Config;
use crate::gpkg::{Gpkg, LayerSpec, shared_memory_uri};
use crate::pool::{ConnectionPool, DataSource};
use crate::types::GeometryType;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use geo_types::{LineString, Point, Polygon};
use rusqlite::types::Value;
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PARKS: [&str; 7] = [
    "Arches",
    "Bryce",
    "Canyonlands",
    "Denali",
    "Everglades",
    "Zion",
    "Yosemite",
];

struct Fixture {
    _databases: Vec<Gpkg>,
    router: Router,
}

/// `public.parks` with a key, `private.secrets`, key-less `stops` and
/// `sites` in EPSG:27700 in main. Only `public` is analyzed.
async fn fixture(name: &str, pool_size: usize, bulk: usize) -> Result<Fixture> {
    let main_name = format!("{name}_main");
    let public_name = format!("{name}_public");
    let private_name = format!("{name}_private");

    let main = Gpkg::new_shared_memory(&main_name)?;
    let stops = main.new_layer(
        &LayerSpec::new("stops", GeometryType::Point, 4326)
            .primary_key(None)
            .column("label", "TEXT"),
    )?;
    for i in 0..bulk {
        stops.insert(
            Point::new(i as f64 / 100.0, 1.0),
            [Value::Text(format!("stop number {i} with a reasonably long label"))],
        )?;
    }

    main.register_srs("OSGB36 / British National Grid", 27700, "EPSG", 27700, "undefined", "")?;
    let sites = main.new_layer(
        &LayerSpec::new("sites", GeometryType::Point, 27700).column("name", "TEXT"),
    )?;
    sites.insert(Point::new(530_000.0, 180_000.0), [Value::Text("london".to_string())])?;
    sites.insert(Point::new(325_000.0, 673_000.0), [Value::Text("edinburgh".to_string())])?;
    sites.update_extent()?;

    let public = Gpkg::new_shared_memory(&public_name)?;
    let parks = public.new_layer(
        &LayerSpec::new("parks", GeometryType::Polygon, 4326)
            .primary_key(Some("id"))
            .column("name", "TEXT"),
    )?;
    for (i, park) in PARKS.iter().enumerate() {
        let x = i as f64 * 10.0;
        let ring = LineString::from(vec![(x, 0.0), (x + 5.0, 0.0), (x + 5.0, 5.0), (x, 5.0), (x, 0.0)]);
        parks.insert(Polygon::new(ring, vec![]), [Value::Text(park.to_string())])?;
    }
    parks.update_extent()?;
    public.connection().execute_batch("ANALYZE")?;

    let private = Gpkg::new_shared_memory(&private_name)?;
    let secrets = private.new_layer(
        &LayerSpec::new("secrets", GeometryType::LineString, 4326).column("code", "TEXT"),
    )?;
    secrets.insert(
        LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]),
        [Value::Text("hidden".to_string())],
    )?;

    let mut config = Config::default();
    config.server.url_base = Some("http://test.local".to_string());
    config.database.table_excludes = vec!["private".to_string()];
    config.database.pool_size = pool_size;

    let pool = ConnectionPool::new(
        DataSource::SharedMemory(main_name),
        vec![
            ("public".to_string(), shared_memory_uri(&public_name)),
            ("private".to_string(), shared_memory_uri(&private_name)),
        ],
        pool_size,
    )?;
    let filter = TableFilter::new(
        config.database.table_includes.clone(),
        config.database.table_excludes.clone(),
    );
    let catalog = DbCatalog::open(pool.clone(), filter).await?;
    let state = AppState::new(Arc::new(catalog), pool, config);

    Ok(Fixture {
        _databases: vec![main, public, private],
        router: router(state),
    })
}

async fn get(router: &Router, uri: &str) -> Result<(StatusCode, HeaderMap, Json)> {
    let request = Request::get(uri).body(Body::empty()).expect("request");
    let response = router.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    Ok((status, headers, serde_json::from_slice(&bytes)?))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn ids(json: &Json) -> Vec<i64> {
    json["features"]
        .as_array()
        .expect("features")
        .iter()
        .map(|f| f["id"].as_i64().expect("numeric id"))
        .collect()
}

#[tokio::test]
async fn landing_conformance_and_health() -> Result<()> {
    let fx = fixture("srv_landing", 2, 1).await?;

    let (status, _, json) = get(&fx.router, "/").await?;
    assert_eq!(status, StatusCode::OK);
    let rels: Vec<&str> = json["links"]
        .as_array()
        .expect("links")
        .iter()
        .filter_map(|l| l["rel"].as_str())
        .collect();
    assert_eq!(rels, ["self", "conformance", "data"]);
    assert_eq!(json["links"][2]["href"], "http://test.local/collections");

    let (status, _, json) = get(&fx.router, "/conformance").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(json["conformsTo"].as_array().expect("classes").len() >= 2);

    let (status, _, json) = get(&fx.router, "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn lists_only_admitted_collections() -> Result<()> {
    let fx = fixture("srv_collections", 2, 1).await?;

    let (status, headers, json) = get(&fx.router, "/collections").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-type"), "application/json");
    let ids: Vec<&str> = json["collections"]
        .as_array()
        .expect("collections")
        .iter()
        .filter_map(|c| c["id"].as_str())
        .collect();
    assert_eq!(ids, ["public.parks", "sites", "stops"]);
    assert_eq!(json["collections"][0]["itemCount"], 7);
    assert!(json["collections"][2].get("itemCount").is_none());

    let (status, _, json) = get(&fx.router, "/collections/public.parks").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["itemType"], "feature");
    assert_eq!(json["geometryType"], "Polygon");
    assert_eq!(json["itemCount"], 7);
    assert_eq!(json["storageCrs"], crate::crs::CRS84_URI);
    assert_eq!(json["extent"]["spatial"]["bbox"][0], serde_json::json!([0.0, 0.0, 65.0, 5.0]));
    assert_eq!(
        json["links"][1]["href"],
        "http://test.local/collections/public.parks/items"
    );

    let (status, _, json) = get(&fx.router, "/collections/private.secrets").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NotFound");
    Ok(())
}

#[tokio::test]
async fn pages_items_in_key_order() -> Result<()> {
    let fx = fixture("srv_paging", 2, 1).await?;

    let (status, headers, json) = get(&fx.router, "/collections/public.parks/items?limit=2").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-type"), "application/geo+json");
    assert_eq!(
        header(&headers, "content-crs"),
        "<http://www.opengis.net/def/crs/OGC/1.3/CRS84>"
    );
    assert_eq!(json["type"], "FeatureCollection");
    assert_eq!(json["numberReturned"], 2);
    assert_eq!(ids(&json), [1, 2]);
    assert_eq!(json["features"][0]["properties"]["name"], "Arches");
    assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
    let next = json["links"]
        .as_array()
        .expect("links")
        .iter()
        .find(|l| l["rel"] == "next")
        .expect("next link");
    assert_eq!(
        next["href"],
        "http://test.local/collections/public.parks/items?limit=2&offset=2"
    );

    let (_, _, json) = get(&fx.router, "/collections/public.parks/items?limit=5&offset=5").await?;
    assert_eq!(ids(&json), [6, 7]);
    assert!(json["links"].as_array().expect("links").iter().all(|l| l["rel"] != "next"));

    let (_, _, json) = get(&fx.router, "/collections/public.parks/items?limit=0").await?;
    assert_eq!(json["features"], serde_json::json!([]));
    assert_eq!(json["numberReturned"], 0);
    Ok(())
}

#[tokio::test]
async fn filters_by_bbox_and_expression() -> Result<()> {
    let fx = fixture("srv_filter", 2, 1).await?;

    let (_, _, json) = get(&fx.router, "/collections/public.parks/items?bbox=-180,-90,180,90").await?;
    assert_eq!(json["numberReturned"], 7);

    let (_, _, json) = get(&fx.router, "/collections/public.parks/items?bbox=11,1,12,2").await?;
    assert_eq!(ids(&json), [2]);

    let (status, _, json) = get(
        &fx.router,
        "/collections/public.parks/items?filter=name%3D%27Zion%27%20AND%20id%3E5",
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&json), [6]);

    let (_, _, json) = get(
        &fx.router,
        "/collections/public.parks/items?filter=name%20LIKE%20%27%25s%27&sortby=-name",
    )
    .await?;
    let names: Vec<&str> = json["features"]
        .as_array()
        .expect("features")
        .iter()
        .filter_map(|f| f["properties"]["name"].as_str())
        .collect();
    assert_eq!(names, ["Everglades", "Canyonlands", "Arches"]);
    Ok(())
}

#[tokio::test]
async fn serves_single_items() -> Result<()> {
    let fx = fixture("srv_item", 2, 1).await?;

    let (status, headers, json) = get(&fx.router, "/collections/public.parks/items/3?properties=name").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-type"), "application/geo+json");
    assert_eq!(json["type"], "Feature");
    assert_eq!(json["id"], 3);
    assert_eq!(json["properties"], serde_json::json!({"name": "Canyonlands"}));
    assert_eq!(
        json["links"][0]["href"],
        "http://test.local/collections/public.parks/items/3"
    );

    let (status, _, json) = get(&fx.router, "/collections/public.parks/items/999").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NotFound");

    let (status, _, json) = get(&fx.router, "/collections/stops/items/42").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NoPrimaryKey");
    Ok(())
}

#[tokio::test]
async fn reprojects_output_geometries() -> Result<()> {
    let fx = fixture("srv_crs", 2, 1).await?;

    let (status, headers, json) = get(
        &fx.router,
        "/collections/public.parks/items/2?crs=3857&precision=0",
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        header(&headers, "content-crs"),
        "<http://www.opengis.net/def/crs/EPSG/0/3857>"
    );
    let x = json["geometry"]["coordinates"][0][0][0].as_f64().expect("x");
    assert_eq!(x, 1_113_195.0);

    let (status, _, json) = get(&fx.router, "/collections/public.parks/items?crs=27700").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "UnsupportedCRS");
    Ok(())
}

#[tokio::test]
async fn untransformable_collections_stay_native() -> Result<()> {
    let fx = fixture("srv_native", 2, 1).await?;
    let native = "http://www.opengis.net/def/crs/EPSG/0/27700";

    let (_, _, json) = get(&fx.router, "/collections/sites").await?;
    assert_eq!(json["crs"], serde_json::json!([native]));
    assert_eq!(json["extent"]["spatial"]["crs"], native);
    assert_eq!(
        json["extent"]["spatial"]["bbox"][0],
        serde_json::json!([325_000.0, 180_000.0, 530_000.0, 673_000.0])
    );

    let (status, headers, json) =
        get(&fx.router, "/collections/sites/items?bbox=500000,100000,600000,200000").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-crs"), format!("<{native}>"));
    assert_eq!(json["numberReturned"], 1);
    assert_eq!(json["features"][0]["properties"]["name"], "london");

    let (status, _, json) = get(&fx.router, "/collections/sites/items?crs=4326").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "UnsupportedCRS");

    let (status, _, _) = get(&fx.router, "/collections/sites/items?bbox=0,0,1,1&bbox-crs=4326").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn rejects_invalid_requests() -> Result<()> {
    let fx = fixture("srv_invalid", 2, 1).await?;

    for (uri, code) in [
        ("/collections/public.parks/items?bbox=1,2,3", "InvalidBbox"),
        ("/collections/public.parks/items?bbox=NaN,0,1,1", "InvalidBbox"),
        ("/collections/public.parks/items?properties=nope", "UnknownProperty"),
        ("/collections/public.parks/items?filter=name%20%3D", "FilterSyntax"),
        ("/collections/public.parks/items?filter=id%3D%27x%27", "TypeMismatch"),
        ("/collections/public.parks/items?limit=-3", "OutOfRange"),
    ] {
        let (status, _, json) = get(&fx.router, uri).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json["code"], code, "{uri}");
        assert!(json["description"].is_string());
    }

    let deep = format!(
        "/collections/public.parks/items?filter={}id%3D1{}",
        "%28".repeat(5000),
        "%29".repeat(5000)
    );
    let huge = "/collections/public.parks/items?filter=id%3E1e999".to_string();
    for uri in [deep, huge] {
        let (status, _, json) = get(&fx.router, &uri).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "FilterSyntax");
    }

    let (status, _, _) = get(&fx.router, "/collections/nope/items").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn streams_large_results() -> Result<()> {
    let fx = fixture("srv_stream", 2, 3000).await?;

    let (status, _, json) = get(&fx.router, "/collections/stops/items?limit=3000").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["numberReturned"], 3000);
    let features = json["features"].as_array().expect("features");
    assert_eq!(features.len(), 3000);
    assert!(features.iter().all(|f| f.get("id").is_none()));
    assert_eq!(
        features[2999]["properties"]["label"],
        "stop number 2999 with a reasonably long label"
    );
    Ok(())
}

#[tokio::test]
async fn abandoned_responses_release_their_connection() -> Result<()> {
    let fx = fixture("srv_abandon", 1, 3000).await?;

    for _ in 0..3 {
        let request = Request::get("/collections/stops/items?limit=3000")
            .body(Body::empty())
            .expect("request");
        let response = fx.router.clone().oneshot(request).await.expect("infallible");
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);
    }

    let request = Request::get("/health").body(Body::empty()).expect("request");
    let response = tokio::time::timeout(Duration::from_secs(5), fx.router.clone().oneshot(request))
        .await
        .expect("pool connection was released")
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_TYPE).is_some());
    Ok(())
}
