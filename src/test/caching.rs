//! Cache behavior across real exchanges.

use super::TestServer;
use crate::cache_control::CacheControl;
use crate::request::Request;
use crate::{Cache, Client};

#[test]
fn fresh_response_replayed_from_cache() {
    let server = TestServer::start(vec![TestServer::response(
        200,
        "OK",
        &[("Cache-Control", "max-age=60"), ("ETag", "\"v1\"")],
        b"cached!",
    )]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let first = client.call(request).execute().unwrap();
    let first_etag = first.header("etag").map(str::to_string);
    // Consuming the body is what commits the entry.
    assert_eq!(first.into_body().unwrap().bytes().unwrap(), b"cached!");

    // A fresh client sharing the same cache must hit the store.
    let fresh_client = client.new_builder().build();
    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let second = fresh_client.call(request).execute().unwrap();

    assert_eq!(second.code(), 200);
    assert!(second.cache_response().is_some());
    assert!(second.network_response().is_none());
    assert_eq!(second.header("etag").map(str::to_string), first_etag);
    assert_eq!(second.into_body().unwrap().bytes().unwrap(), b"cached!");

    let stats = client.cache().unwrap().stats();
    assert_eq!(stats.request_count, 2);
    assert_eq!(stats.network_count, 1);
    assert_eq!(stats.hit_count, 1);

    // The server saw exactly one request.
    assert_eq!(server.finish().len(), 1);
}

#[test]
fn stale_entry_revalidated_with_304() {
    let server = TestServer::start(vec![
        TestServer::response(
            200,
            "OK",
            &[("Cache-Control", "max-age=0"), ("ETag", "\"v1\""), ("X-Origin", "a")],
            b"payload",
        ),
        TestServer::response(
            304,
            "Not Modified",
            &[("ETag", "\"v1\""), ("X-Origin", "b")],
            b"",
        ),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let first = client.call(request).execute().unwrap();
    assert_eq!(first.into_body().unwrap().bytes().unwrap(), b"payload");

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let second = client.call(request).execute().unwrap();

    assert_eq!(second.code(), 200);
    assert!(second.cache_response().is_some());
    assert!(second.network_response().is_some());
    // The 304's headers update the stored ones.
    assert_eq!(second.header("x-origin"), Some("b"));
    // The stored body is reused.
    assert_eq!(second.into_body().unwrap().bytes().unwrap(), b"payload");

    let stats = client.cache().unwrap().stats();
    assert_eq!(stats.conditional_hit_count, 1);

    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].header("if-none-match"), Some("\"v1\""));
}

#[test]
fn superseding_200_replaces_entry() {
    let server = TestServer::start(vec![
        TestServer::response(
            200,
            "OK",
            &[("Cache-Control", "max-age=0"), ("ETag", "\"v1\"")],
            b"old",
        ),
        TestServer::response(
            200,
            "OK",
            &[("Cache-Control", "max-age=60"), ("ETag", "\"v2\"")],
            b"new",
        ),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    client
        .call(request)
        .execute()
        .unwrap()
        .into_body()
        .unwrap()
        .bytes()
        .unwrap();

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let second = client.call(request).execute().unwrap();
    assert_eq!(second.header("etag"), Some("\"v2\""));
    // The losing candidate is discarded, not attached.
    assert!(second.cache_response().is_none());
    assert_eq!(second.into_body().unwrap().bytes().unwrap(), b"new");

    // The replacement is served from cache now.
    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let third = client.call(request).execute().unwrap();
    assert!(third.network_response().is_none());
    assert_eq!(third.into_body().unwrap().bytes().unwrap(), b"new");

    assert_eq!(server.finish().len(), 2);
}

#[test]
fn only_if_cached_unsatisfiable_yields_504() {
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get("http://unreachable.test/doc")
        .cache_control(CacheControl::FORCE_CACHE)
        .build()
        .unwrap();
    let response = client.call(request).execute().unwrap();

    assert_eq!(response.code(), 504);
    assert!(response.network_response().is_none());
    assert!(response.cache_response().is_none());
    assert_eq!(response.into_body().unwrap().bytes().unwrap(), b"");
}

#[test]
fn force_network_bypasses_fresh_entry() {
    let server = TestServer::start(vec![
        TestServer::response(200, "OK", &[("Cache-Control", "max-age=60")], b"first"),
        TestServer::response(200, "OK", &[("Cache-Control", "max-age=60")], b"second"),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/")).build().unwrap();
    client
        .call(request)
        .execute()
        .unwrap()
        .into_body()
        .unwrap()
        .bytes()
        .unwrap();

    let request = Request::get(&*server.url("/"))
        .cache_control(CacheControl::FORCE_NETWORK)
        .build()
        .unwrap();
    let second = client.call(request).execute().unwrap();
    assert!(second.network_response().is_some());
    // The bypassed entry does not ride along on the response.
    assert!(second.cache_response().is_none());
    assert_eq!(second.into_body().unwrap().bytes().unwrap(), b"second");

    assert_eq!(server.finish().len(), 2);
}

#[test]
fn vary_mismatch_fetches_again() {
    let server = TestServer::start(vec![
        TestServer::response(
            200,
            "OK",
            &[("Cache-Control", "max-age=60"), ("Vary", "Accept-Language")],
            b"english",
        ),
        TestServer::response(
            200,
            "OK",
            &[("Cache-Control", "max-age=60"), ("Vary", "Accept-Language")],
            b"deutsch",
        ),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/greeting"))
        .header("Accept-Language", "en")
        .build()
        .unwrap();
    let first = client.call(request).execute().unwrap();
    assert_eq!(first.into_body().unwrap().bytes().unwrap(), b"english");

    let request = Request::get(&*server.url("/greeting"))
        .header("Accept-Language", "de")
        .build()
        .unwrap();
    let second = client.call(request).execute().unwrap();
    assert_eq!(second.into_body().unwrap().bytes().unwrap(), b"deutsch");

    // Same language again: the de entry replaced the en one and matches.
    let request = Request::get(&*server.url("/greeting"))
        .header("Accept-Language", "de")
        .build()
        .unwrap();
    let third = client.call(request).execute().unwrap();
    assert!(third.network_response().is_none());
    assert_eq!(third.into_body().unwrap().bytes().unwrap(), b"deutsch");

    assert_eq!(server.finish().len(), 2);
}

#[test]
fn no_store_response_is_not_cached() {
    let server = TestServer::start(vec![
        TestServer::response(200, "OK", &[("Cache-Control", "no-store")], b"secret"),
        TestServer::response(200, "OK", &[("Cache-Control", "no-store")], b"secret"),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    for _ in 0..2 {
        let request = Request::get(&*server.url("/")).build().unwrap();
        let response = client.call(request).execute().unwrap();
        assert_eq!(response.into_body().unwrap().bytes().unwrap(), b"secret");
    }
    assert_eq!(server.finish().len(), 2);
}

#[test]
fn post_invalidates_cached_entry() {
    let server = TestServer::start(vec![
        TestServer::response(200, "OK", &[("Cache-Control", "max-age=60")], b"v1"),
        TestServer::response(200, "OK", &[], b"posted"),
        TestServer::response(200, "OK", &[("Cache-Control", "max-age=60")], b"v2"),
    ]);
    let client = Client::builder().cache(Cache::in_memory()).build();

    let request = Request::get(&*server.url("/doc")).build().unwrap();
    client
        .call(request)
        .execute()
        .unwrap()
        .into_body()
        .unwrap()
        .bytes()
        .unwrap();

    let request = Request::builder()
        .url(&*server.url("/doc"))
        .post("update".into())
        .build()
        .unwrap();
    client
        .call(request)
        .execute()
        .unwrap()
        .into_body()
        .unwrap()
        .bytes()
        .unwrap();

    // The GET entry was invalidated by the successful POST.
    let request = Request::get(&*server.url("/doc")).build().unwrap();
    let third = client.call(request).execute().unwrap();
    assert!(third.network_response().is_some());
    assert_eq!(third.into_body().unwrap().bytes().unwrap(), b"v2");

    assert_eq!(server.finish().len(), 3);
}
