use axum::response::Html;

const UPLOAD_FORM: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Pokédex</title></head>
<body>
<h1>Pokédex</h1>
<p>Upload a picture of a Pokémon (JPEG or PNG).</p>
<form action="/classify" method="post" enctype="multipart/form-data">
  <input type="file" name="image" accept="image/jpeg,image/png">
  <button type="submit">Identify</button>
</form>
</body>
</html>
"#;

/// GET /
pub async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}
