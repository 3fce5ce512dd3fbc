//! The operator UI shell: a single embedded HTML document with inline
//! JavaScript driving `EventSource` against `/events` and `fetch` against
//! the approve/deny endpoints. No client-side build step — this is an
//! operator tool, not a product surface.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Cloister Guardian</title>
<style>
  body { font-family: monospace; background: #111; color: #ddd; margin: 2rem; }
  h1 { color: #9cf; }
  .req { border: 1px solid #333; padding: 0.75rem; margin-bottom: 0.75rem; }
  .req .target { font-weight: bold; color: #fff; }
  button { margin-right: 0.5rem; cursor: pointer; }
  .empty { color: #777; }
</style>
</head>
<body>
<h1>Cloister Guardian — pending approvals</h1>
<div id="pending"><p class="empty">loading...</p></div>
<script>
const pending = new Map();

function render() {
  const el = document.getElementById('pending');
  if (pending.size === 0) {
    el.innerHTML = '<p class="empty">nothing pending</p>';
    return;
  }
  el.innerHTML = '';
  for (const req of pending.values()) {
    const div = document.createElement('div');
    div.className = 'req';
    const isDomain = req.kind === 'domain';
    const approveUrl = isDomain ? `/approve-domain/${req.id}` : `/approve-command/${req.id}`;
    const denyUrl = isDomain ? `/deny-domain/${req.id}` : `/deny-command/${req.id}`;
    div.innerHTML = `
      <div>${req.kind} — ${req.project} / ${req.container}</div>
      <div class="target">${req.target}</div>
      <div>
        <button data-url="${approveUrl}" data-scope="once">approve once</button>
        <button data-url="${approveUrl}" data-scope="session">approve session</button>
        <button data-url="${approveUrl}" data-scope="project">approve project</button>
        <button data-url="${approveUrl}" data-scope="global">approve global</button>
        <button data-url="${denyUrl}" data-scope="">deny</button>
      </div>`;
    for (const btn of div.querySelectorAll('button')) {
      btn.addEventListener('click', () => resolve(btn.dataset.url, btn.dataset.scope, isDomain));
    }
    el.appendChild(div);
  }
}

function resolve(url, scope, isDomain) {
  const body = isDomain && scope ? { scope } : {};
  fetch(url, {
    method: 'POST',
    headers: { 'content-type': 'application/json' },
    body: JSON.stringify(body),
  });
}

const source = new EventSource('/events');
source.onmessage = (ev) => {
  const msg = JSON.parse(ev.data);
  if (msg.type === 'snapshot') {
    pending.clear();
    for (const req of msg.requests) pending.set(req.id, req);
  } else if (msg.type === 'added') {
    pending.set(msg.request.id, msg.request);
  } else if (msg.type === 'removed') {
    pending.delete(msg.id);
  }
  render();
};
</script>
</body>
</html>"#;
